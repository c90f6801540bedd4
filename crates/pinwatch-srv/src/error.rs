//! Error types for the pinwatch monitoring service.

use pinwatch_core::PinwatchError;
use thiserror::Error;

/// Errors that can occur while configuring or running the monitor.
#[derive(Error, Debug)]
pub enum SrvError {
    /// Configuration is invalid or missing required fields.
    #[error("config error: {0}")]
    Config(String),

    /// Metadata file could not be read or parsed.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Logging could not be initialized.
    #[error("logging error: {0}")]
    Logging(String),

    /// The scheduler was started twice.
    #[error("scheduler already started")]
    AlreadyRunning,

    /// Store or core failure.
    #[error(transparent)]
    Core(#[from] PinwatchError),
}
