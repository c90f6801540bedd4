//! Trust evaluation of a captured leaf certificate.
//!
//! Order matters: expiry short-circuits everything, then the hostname is
//! checked, then the pins. The first failing check decides the reason.

use chrono::{DateTime, SecondsFormat, Utc};
use pinwatch_core::{CertificateInfo, CheckResult, FailureReason, Pin, ServerKey};
use std::net::IpAddr;

use crate::cert::LeafCertificate;

/// Outcome of evaluating one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Observed certificate fields, when the certificate could be parsed
    pub certificate: Option<CertificateInfo>,
    /// First failed check, `None` when healthy
    pub failure: Option<(FailureReason, String)>,
}

impl Evaluation {
    /// Turn the evaluation into the result for `key`
    #[must_use]
    pub fn into_result(self, key: ServerKey, checked_at: DateTime<Utc>) -> CheckResult {
        let result = match self.failure {
            None => CheckResult::healthy(key, checked_at, None),
            Some((reason, detail)) => CheckResult::unhealthy(key, checked_at, reason, detail),
        };
        match self.certificate {
            Some(certificate) => result.with_certificate(certificate),
            None => result,
        }
    }

    const fn passed(certificate: CertificateInfo) -> Self {
        Self {
            certificate: Some(certificate),
            failure: None,
        }
    }

    fn failed(reason: FailureReason, detail: String, certificate: Option<CertificateInfo>) -> Self {
        Self {
            certificate,
            failure: Some((reason, detail)),
        }
    }
}

/// Evaluate a DER certificate presented for `host` against `pins` at `now`.
#[must_use]
pub fn evaluate(der: &[u8], host: &str, pins: &[Pin], now: DateTime<Utc>) -> Evaluation {
    let leaf = match LeafCertificate::from_der(der) {
        Ok(leaf) => leaf,
        Err(e) => return Evaluation::failed(FailureReason::ConnectionFailed, e.to_string(), None),
    };
    let info = leaf.info();

    if now > leaf.not_after {
        return Evaluation::failed(
            FailureReason::Expired,
            format!(
                "certificate expired on {}",
                leaf.not_after.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            Some(info),
        );
    }

    if !matches_hostname(&leaf, host) {
        return Evaluation::failed(
            FailureReason::HostnameMismatch,
            format!(
                "certificate CN ({}) and SANs do not match hostname ({host})",
                leaf.common_name.as_deref().unwrap_or("")
            ),
            Some(info),
        );
    }

    if !matches_pin(&leaf.fingerprint, pins) {
        return Evaluation::failed(
            FailureReason::PinMismatch,
            format!(
                "certificate fingerprint ({}) does not match any pin in metadata",
                leaf.fingerprint
            ),
            Some(info),
        );
    }

    Evaluation::passed(info)
}

/// Does the certificate cover `host`?
///
/// IP literals are compared against IP SANs only; names against the CN and
/// DNS SANs.
#[must_use]
pub fn matches_hostname(leaf: &LeafCertificate, host: &str) -> bool {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return leaf.ip_addresses.contains(&ip);
    }
    leaf.common_name
        .iter()
        .chain(&leaf.dns_names)
        .any(|pattern| matches_pattern(pattern, host))
}

/// Case-insensitive name match with one level of left-most wildcard.
///
/// `*.example.com` matches `api.example.com`, but neither `example.com`
/// nor `a.b.example.com`.
#[must_use]
pub fn matches_pattern(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let hostname = hostname.to_ascii_lowercase();

    if pattern == hostname {
        return true;
    }

    pattern.strip_prefix("*.").is_some_and(|suffix| {
        hostname
            .strip_suffix(suffix)
            .and_then(|rest| rest.strip_suffix('.'))
            .is_some_and(|label| !label.is_empty() && !label.contains('.'))
    })
}

/// Is `fingerprint` the digest of some `sha256` pin?
#[must_use]
pub fn matches_pin(fingerprint: &str, pins: &[Pin]) -> bool {
    pins.iter()
        .any(|pin| pin.is_sha256() && pin.digest == fingerprint)
}
