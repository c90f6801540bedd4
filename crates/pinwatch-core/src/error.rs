use thiserror::Error;

/// Result type alias for pinwatch operations
pub type Result<T> = std::result::Result<T, PinwatchError>;

/// Errors raised by stores and metadata providers.
///
/// Probe failures are not errors: they are reported as unhealthy
/// [`CheckResult`](crate::CheckResult)s.
#[derive(Error, Debug)]
pub enum PinwatchError {
    /// The status store failed to read or write
    #[error("store error: {0}")]
    Store(String),

    /// A store operation did not complete (worker task failed)
    #[error("store task failed: {0}")]
    StoreTask(String),

    /// Federation metadata could not be loaded or parsed
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Configuration is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
