//! Custom error types for the application.
//!
//! This module defines the primary error type, `EigerError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different failure classes the orchestrator
//! deals with:
//!
//! - **`Transport`**: a device API call failed at the communication layer
//!   (connection refused, timeout, non-success HTTP status). These are the
//!   transient faults the retry policies absorb.
//! - **`Protocol`**: the device answered, but the reply did not have the
//!   expected shape (missing `value` key, non-JSON body).
//! - **`DeviceState`**: the detector reports a state (`na`, `error`) that
//!   blocks the requested operation and triggers recovery.
//! - **`Config`** / **`Validation`**: configuration could not be loaded, or
//!   loaded values failed semantic validation (bad host, port 0, unwritable
//!   dump directory). Fatal at startup.
//! - **`Io`**: file system errors while dumping harvested files.
//!
//! Lifecycle code catches `Transport` and `DeviceState` errors and converts
//! them to log output plus readback-point state; they are never allowed to
//! take the orchestrator process down.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, EigerError>;

#[derive(Error, Debug)]
pub enum EigerError {
    #[error("Device communication error: {0}")]
    Transport(String),

    #[error("Malformed device reply: {0}")]
    Protocol(String),

    #[error("Detector reports state '{0}'")]
    DeviceState(String),

    #[error("Configuration load error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File harvest incomplete: {0}")]
    HarvestTimeout(String),
}

impl EigerError {
    /// Whether the error is a transient communication fault worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, EigerError::Transport(_) | EigerError::DeviceState(_))
    }
}

impl From<reqwest::Error> for EigerError {
    fn from(err: reqwest::Error) -> Self {
        EigerError::Transport(err.to_string())
    }
}
