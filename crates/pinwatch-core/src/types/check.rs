use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::server::ServerKey;
use crate::PinwatchError;

/// Why a probe reported a server as unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// The base URI could not be parsed into host and port
    InvalidAddress,
    /// No certificate was obtained from the server
    ConnectionFailed,
    /// The certificate's `notAfter` is in the past
    Expired,
    /// Neither the CN nor any SAN matches the requested host
    HostnameMismatch,
    /// The certificate fingerprint matches no `sha256` pin
    PinMismatch,
}

impl FailureReason {
    /// Stable reason code, as persisted
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidAddress => "invalid-address",
            Self::ConnectionFailed => "connection-failed",
            Self::Expired => "expired",
            Self::HostnameMismatch => "hostname-mismatch",
            Self::PinMismatch => "pin-mismatch",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = PinwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invalid-address" => Ok(Self::InvalidAddress),
            "connection-failed" => Ok(Self::ConnectionFailed),
            "expired" => Ok(Self::Expired),
            "hostname-mismatch" => Ok(Self::HostnameMismatch),
            "pin-mismatch" => Ok(Self::PinMismatch),
            other => Err(PinwatchError::Store(format!("unknown failure reason '{other}'"))),
        }
    }
}

/// Fields observed on the server's leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    /// Subject common name, if the certificate has one
    pub common_name: Option<String>,

    /// End of the validity period
    pub not_after: DateTime<Utc>,

    /// Base64 SHA-256 of the DER encoding
    pub fingerprint: String,
}

/// Outcome of one probe. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Server that was probed
    pub key: ServerKey,

    /// When the check began
    pub checked_at: DateTime<Utc>,

    /// Overall verdict
    pub healthy: bool,

    /// Reason code when unhealthy
    pub reason: Option<FailureReason>,

    /// Human-readable explanation when unhealthy
    pub detail: Option<String>,

    /// Leaf certificate fields, if a certificate was obtained
    pub certificate: Option<CertificateInfo>,
}

impl CheckResult {
    /// A passing result
    #[must_use]
    pub const fn healthy(
        key: ServerKey,
        checked_at: DateTime<Utc>,
        certificate: Option<CertificateInfo>,
    ) -> Self {
        Self {
            key,
            checked_at,
            healthy: true,
            reason: None,
            detail: None,
            certificate,
        }
    }

    /// A failing result with a reason code and explanation
    #[must_use]
    pub fn unhealthy(
        key: ServerKey,
        checked_at: DateTime<Utc>,
        reason: FailureReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            key,
            checked_at,
            healthy: false,
            reason: Some(reason),
            detail: Some(detail.into()),
            certificate: None,
        }
    }

    /// Attach the observed certificate fields
    #[must_use]
    pub fn with_certificate(mut self, certificate: CertificateInfo) -> Self {
        self.certificate = Some(certificate);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes_round_trip() {
        for reason in [
            FailureReason::InvalidAddress,
            FailureReason::ConnectionFailed,
            FailureReason::Expired,
            FailureReason::HostnameMismatch,
            FailureReason::PinMismatch,
        ] {
            assert_eq!(reason.as_str().parse::<FailureReason>().unwrap(), reason);
        }
        assert!("timeout".parse::<FailureReason>().is_err());
    }

    #[test]
    fn test_reason_serializes_as_code() {
        let json = serde_json::to_string(&FailureReason::HostnameMismatch).unwrap();
        assert_eq!(json, "\"hostname-mismatch\"");
    }

    #[test]
    fn test_constructors() {
        let key = ServerKey::new("e", "https://a.example/");
        let now = Utc::now();

        let ok = CheckResult::healthy(key.clone(), now, None);
        assert!(ok.healthy);
        assert!(ok.reason.is_none());
        assert!(ok.detail.is_none());

        let bad = CheckResult::unhealthy(key, now, FailureReason::Expired, "expired yesterday");
        assert!(!bad.healthy);
        assert_eq!(bad.reason, Some(FailureReason::Expired));
        assert_eq!(bad.detail.as_deref(), Some("expired yesterday"));
    }
}
