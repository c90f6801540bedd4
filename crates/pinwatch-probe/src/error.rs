use pinwatch_core::FailureReason;
use thiserror::Error;

/// Result type alias for probe internals
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

/// Failures inside a probe.
///
/// These never leave the crate as errors; [`ProbeError::reason`] maps each
/// one onto the reason code of an unhealthy result.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Base URI is unusable as a dial target
    #[error("{0}")]
    InvalidAddress(String),

    /// TCP connect failed
    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),

    /// TCP connect did not finish in time
    #[error("connection timed out")]
    Timeout,

    /// TLS client could not be configured
    #[error("tls setup failed: {0}")]
    Tls(String),

    /// The server never presented a certificate
    #[error("no certificate received from server")]
    NoCertificate,

    /// The presented certificate is not valid DER X.509
    #[error("unparseable server certificate: {0}")]
    Certificate(String),
}

impl ProbeError {
    /// Reason code for an unhealthy result caused by this error
    #[must_use]
    pub const fn reason(&self) -> FailureReason {
        match self {
            Self::InvalidAddress(_) => FailureReason::InvalidAddress,
            Self::Connect(_)
            | Self::Timeout
            | Self::Tls(_)
            | Self::NoCertificate
            | Self::Certificate(_) => FailureReason::ConnectionFailed,
        }
    }
}
