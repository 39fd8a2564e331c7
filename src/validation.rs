//! Startup validators for network endpoint and file system settings.
//!
//! These run once during configuration validation and fail fast: a typo in
//! the detector address or an unwritable dump directory should stop the
//! process before any device communication is attempted.

use std::net::IpAddr;
use std::path::Path;

/// Validates that a given string parses as an IP address.
pub fn is_valid_ip(ip: &str) -> Result<(), &'static str> {
    ip.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| "Invalid IP address")
}

/// Validates that a port number is usable. By type the value is already
/// within 0-65535; port 0 is reserved and rejected.
pub fn is_valid_port(port: u16) -> Result<(), &'static str> {
    if port > 0 {
        Ok(())
    } else {
        Err("Port number must be greater than 0")
    }
}

/// Ensures a directory exists (creating it if necessary) and is writable.
///
/// Writability is probed by creating and removing a marker file, which is
/// the only check that holds across platforms and mount options.
pub fn ensure_writable_dir(path: &Path) -> Result<(), String> {
    std::fs::create_dir_all(path)
        .map_err(|e| format!("Cannot create directory '{}': {}", path.display(), e))?;

    if !path.is_dir() {
        return Err(format!("'{}' is not a directory", path.display()));
    }

    let probe = path.join(".write_probe");
    std::fs::write(&probe, b"probe")
        .map_err(|e| format!("Directory '{}' is not writable: {}", path.display(), e))?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_validation() {
        assert!(is_valid_ip("172.17.1.2").is_ok());
        assert!(is_valid_ip("::1").is_ok());
        assert!(is_valid_ip("not-an-ip").is_err());
        assert!(is_valid_ip("256.1.1.1").is_err());
    }

    #[test]
    fn test_port_validation() {
        assert!(is_valid_port(80).is_ok());
        assert!(is_valid_port(0).is_err());
    }

    #[test]
    fn test_writable_dir_probe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("dump");
        assert!(ensure_writable_dir(&nested).is_ok());
        assert!(nested.is_dir());
    }
}
