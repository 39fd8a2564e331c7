//! Configuration system using Figment.
//!
//! Strongly-typed settings loaded from:
//! 1. a TOML file (`config/default.toml` unless overridden on the CLI)
//! 2. environment variables prefixed with `EIGER_`
//!
//! # Environment Variable Overrides
//!
//! ```text
//! EIGER_DETECTOR_HOST=172.17.1.2
//! EIGER_DETECTOR_PORT=80
//! EIGER_STORAGE_DATA_DIR=/data/eiger
//! EIGER_APPLICATION_LOG_LEVEL=debug
//! ```
//!
//! After loading, `validate()` checks the endpoint and dump directory and
//! fails fast with a descriptive message.

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppResult, EigerError};
use crate::validation::{ensure_writable_dir, is_valid_ip, is_valid_port};

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Detector endpoint
    pub detector: DetectorSettings,
    /// Local file dump settings
    pub storage: StorageSettings,
    /// Pacing of pollers, settles and bounded waits
    #[serde(default)]
    pub timing: TimingSettings,
}

/// Application-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Detector endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSettings {
    /// IP address of the detector control unit
    pub host: String,
    /// Port of the detector API (usually 80)
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Local file dump settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory where harvested detector files are dumped. Presence of a
    /// file name in this directory is the deduplication ledger.
    pub data_dir: PathBuf,
    /// Default prefix for output file names; settable at runtime through
    /// the OutputFilePrefix point.
    #[serde(default = "default_prefix")]
    pub output_file_prefix: String,
}

/// Pacing of the periodic tasks and bounded waits.
///
/// All values are tunables with defaults matching the detector's observed
/// behavior; they rarely need changing outside tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Status poller period in seconds
    #[serde(default = "default_status_poll_s")]
    pub status_poll_s: f64,
    /// File scanner period in seconds
    #[serde(default = "default_file_scan_s")]
    pub file_scan_s: f64,
    /// Settle pause after a system restart command, in milliseconds
    #[serde(default = "default_restart_settle_ms")]
    pub restart_settle_ms: u64,
    /// Settle pause after a recovery restart before re-initializing
    #[serde(default = "default_recovery_settle_ms")]
    pub recovery_settle_ms: u64,
    /// Pause between pre-arm quiescence polls, in milliseconds
    #[serde(default = "default_quiescence_poll_ms")]
    pub quiescence_poll_ms: u64,
    /// Number of pre-arm quiescence polls before proceeding anyway
    #[serde(default = "default_quiescence_attempts")]
    pub quiescence_attempts: u32,
    /// Pause between file-listing polls while harvesting, in milliseconds
    #[serde(default = "default_harvest_poll_ms")]
    pub harvest_poll_ms: u64,
    /// Harvest polling budget in seconds; on expiry a partial harvest is kept
    #[serde(default = "default_harvest_timeout_s")]
    pub harvest_timeout_s: u64,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            status_poll_s: default_status_poll_s(),
            file_scan_s: default_file_scan_s(),
            restart_settle_ms: default_restart_settle_ms(),
            recovery_settle_ms: default_recovery_settle_ms(),
            quiescence_poll_ms: default_quiescence_poll_ms(),
            quiescence_attempts: default_quiescence_attempts(),
            harvest_poll_ms: default_harvest_poll_ms(),
            harvest_timeout_s: default_harvest_timeout_s(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    80
}

fn default_prefix() -> String {
    "eiger_".to_string()
}

fn default_status_poll_s() -> f64 {
    5.0
}

fn default_file_scan_s() -> f64 {
    5.0
}

fn default_restart_settle_ms() -> u64 {
    100
}

fn default_recovery_settle_ms() -> u64 {
    2000
}

fn default_quiescence_poll_ms() -> u64 {
    500
}

fn default_quiescence_attempts() -> u32 {
    50
}

fn default_harvest_poll_ms() -> u64 {
    100
}

fn default_harvest_timeout_s() -> u64 {
    20
}

impl Settings {
    /// Load settings from the default configuration file and environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/default.toml")
    }

    /// Load settings from a specific TOML file, with `EIGER_`-prefixed
    /// environment variables taking precedence.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("EIGER_").split("_"))
            .extract()
            .map_err(EigerError::Config)?;
        Ok(settings)
    }

    /// Validate settings after loading.
    ///
    /// Checks:
    /// - detector host parses as an IP address
    /// - detector port is non-zero
    /// - the dump directory exists (created if missing) and is writable
    /// - the log level is one the logger understands
    /// - poller periods are positive
    pub fn validate(&self) -> AppResult<()> {
        is_valid_ip(&self.detector.host).map_err(|e| {
            EigerError::Validation(format!("detector.host '{}': {}", self.detector.host, e))
        })?;

        is_valid_port(self.detector.port).map_err(|e| {
            EigerError::Validation(format!("detector.port {}: {}", self.detector.port, e))
        })?;

        ensure_writable_dir(&self.storage.data_dir).map_err(EigerError::Validation)?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(EigerError::Validation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.timing.status_poll_s <= 0.0 {
            return Err(EigerError::Validation(format!(
                "timing.status_poll_s must be positive, got {}",
                self.timing.status_poll_s
            )));
        }

        Ok(())
    }
}
