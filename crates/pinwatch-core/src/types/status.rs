use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::check::{CheckResult, FailureReason};
use super::server::ServerKey;

/// The persisted status row for one server: its most recent check, or all
/// empty if it has never been checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Server identity
    pub key: ServerKey,

    /// When the last check ran
    pub last_checked: Option<DateTime<Utc>>,

    /// Verdict of the last check
    pub healthy: Option<bool>,

    /// Reason code of the last failed check
    pub reason: Option<FailureReason>,

    /// Explanation of the last failed check
    pub detail: Option<String>,

    /// Certificate common name seen by the last check
    pub cert_common_name: Option<String>,

    /// Certificate expiry seen by the last check
    pub cert_expires: Option<DateTime<Utc>>,

    /// Certificate fingerprint seen by the last check
    pub cert_fingerprint: Option<String>,
}

impl ServerStatus {
    /// A never-checked row
    #[must_use]
    pub const fn unchecked(key: ServerKey) -> Self {
        Self {
            key,
            last_checked: None,
            healthy: None,
            reason: None,
            detail: None,
            cert_common_name: None,
            cert_expires: None,
            cert_fingerprint: None,
        }
    }

    /// Health classification for reporting
    #[must_use]
    pub const fn health(&self) -> HealthState {
        match self.healthy {
            None => HealthState::Unchecked,
            Some(true) => HealthState::Healthy,
            Some(false) => HealthState::Unhealthy,
        }
    }
}

impl From<&CheckResult> for ServerStatus {
    fn from(result: &CheckResult) -> Self {
        let cert = result.certificate.as_ref();
        Self {
            key: result.key.clone(),
            last_checked: Some(result.checked_at),
            healthy: Some(result.healthy),
            reason: result.reason,
            detail: result.detail.clone(),
            cert_common_name: cert.and_then(|c| c.common_name.clone()),
            cert_expires: cert.map(|c| c.not_after),
            cert_fingerprint: cert.map(|c| c.fingerprint.clone()),
        }
    }
}

/// Health classification of a status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Last check passed
    Healthy,
    /// Last check failed
    Unhealthy,
    /// Never checked
    Unchecked,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unchecked => write!(f, "unchecked"),
        }
    }
}

/// Row counts per health state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Rows whose last check passed
    pub healthy: usize,
    /// Rows whose last check failed
    pub unhealthy: usize,
    /// Rows never checked
    pub unchecked: usize,
}

impl StatusSummary {
    /// Total number of rows
    #[must_use]
    pub const fn total(&self) -> usize {
        self.healthy + self.unhealthy + self.unchecked
    }
}

/// One row returned by the selection query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionCandidate {
    /// Server to check
    pub key: ServerKey,

    /// When it was last checked, if ever
    pub last_checked: Option<DateTime<Utc>>,
}

/// Parameters of the "which servers need checking" query.
///
/// Priority keys come first (in the given order) once their
/// `priority_min_interval` has elapsed; then every other server whose last
/// check is absent or older than `min_interval`, never-checked first and
/// then oldest first. At most `limit` rows are returned.
#[derive(Debug, Clone)]
pub struct SelectionQuery {
    /// Freshness window for ordinary selection
    pub min_interval: Duration,

    /// Maximum number of candidates
    pub limit: usize,

    /// Priority-flagged keys, in request order
    pub priority: Vec<ServerKey>,

    /// Freshness window for priority selection
    pub priority_min_interval: Duration,

    /// Reference time for both windows
    pub now: DateTime<Utc>,
}

impl SelectionQuery {
    /// Servers checked at or after this instant are too fresh for ordinary selection
    #[must_use]
    pub fn ordinary_cutoff(&self) -> DateTime<Utc> {
        cutoff(self.now, self.min_interval)
    }

    /// Servers checked at or after this instant are too fresh even for priority selection
    #[must_use]
    pub fn priority_cutoff(&self) -> DateTime<Utc> {
        cutoff(self.now, self.priority_min_interval)
    }
}

fn cutoff(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CertificateInfo;

    #[test]
    fn test_status_from_result() {
        let now = Utc::now();
        let result = CheckResult::unhealthy(
            ServerKey::new("e", "https://a.example/"),
            now,
            FailureReason::PinMismatch,
            "no pin",
        )
        .with_certificate(CertificateInfo {
            common_name: Some("a.example".into()),
            not_after: now,
            fingerprint: "fp".into(),
        });

        let status = ServerStatus::from(&result);
        assert_eq!(status.health(), HealthState::Unhealthy);
        assert_eq!(status.last_checked, Some(now));
        assert_eq!(status.reason, Some(FailureReason::PinMismatch));
        assert_eq!(status.cert_common_name.as_deref(), Some("a.example"));
        assert_eq!(status.cert_fingerprint.as_deref(), Some("fp"));
    }

    #[test]
    fn test_unchecked_status() {
        let status = ServerStatus::unchecked(ServerKey::new("e", "u"));
        assert_eq!(status.health(), HealthState::Unchecked);
        assert!(status.last_checked.is_none());
    }

    #[test]
    fn test_cutoffs() {
        let now = Utc::now();
        let query = SelectionQuery {
            min_interval: Duration::from_secs(3600),
            limit: 1,
            priority: Vec::new(),
            priority_min_interval: Duration::from_secs(60),
            now,
        };
        assert_eq!(query.ordinary_cutoff(), now - TimeDelta::hours(1));
        assert_eq!(query.priority_cutoff(), now - TimeDelta::minutes(1));
    }

    #[test]
    fn test_cutoff_saturates() {
        let query = SelectionQuery {
            min_interval: Duration::MAX,
            limit: 1,
            priority: Vec::new(),
            priority_min_interval: Duration::ZERO,
            now: Utc::now(),
        };
        assert_eq!(query.ordinary_cutoff(), DateTime::<Utc>::MIN_UTC);
        assert_eq!(query.priority_cutoff(), query.now);
    }
}
