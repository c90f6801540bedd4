use async_trait::async_trait;
use chrono::Utc;
use pinwatch_core::{CheckResult, Server, ServerKey, TrustChecker};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::address::parse_base_uri;
use crate::capture::capture_leaf;
use crate::verify::evaluate;

/// Default bound on TCP connect and on the TLS handshake
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Checks a server by handshaking with it and evaluating the leaf it presents.
#[derive(Debug, Clone)]
pub struct TlsTrustChecker {
    timeout: Duration,
}

impl TlsTrustChecker {
    /// Create a checker with the given connect/handshake timeout
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Configured timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for TlsTrustChecker {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl TrustChecker for TlsTrustChecker {
    #[instrument(skip(self, server), fields(base_uri = %server.base_uri))]
    async fn check(&self, entity_id: &str, server: &Server) -> CheckResult {
        let checked_at = Utc::now();
        let key = ServerKey::new(entity_id, server.base_uri.as_str());

        let target = match parse_base_uri(&server.base_uri) {
            Ok(target) => target,
            Err(e) => return CheckResult::unhealthy(key, checked_at, e.reason(), e.to_string()),
        };

        let der = match capture_leaf(&target, self.timeout).await {
            Ok(der) => der,
            Err(e) => {
                debug!(error = %e, "no certificate captured");
                return CheckResult::unhealthy(
                    key,
                    checked_at,
                    e.reason(),
                    format!("TLS connection failed: {e}"),
                );
            }
        };

        evaluate(&der, &target.host, &server.pins, checked_at).into_result(key, checked_at)
    }
}

/// Reports every server healthy without touching the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticChecker;

#[async_trait]
impl TrustChecker for StaticChecker {
    async fn check(&self, entity_id: &str, server: &Server) -> CheckResult {
        CheckResult::healthy(
            ServerKey::new(entity_id, server.base_uri.as_str()),
            Utc::now(),
            None,
        )
    }
}
