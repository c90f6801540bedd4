//! The seams the scheduler is written against.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

use crate::types::{
    CheckResult, Metadata, SelectionCandidate, SelectionQuery, Server, ServerKey,
};
use crate::Result;

/// Probes one server and classifies it.
///
/// Implementations never fail: every failure mode is an unhealthy
/// [`CheckResult`] carrying a [`FailureReason`](crate::FailureReason).
#[async_trait]
pub trait TrustChecker: Send + Sync {
    /// Check `server`, published by `entity_id`, against its current pins
    async fn check(&self, entity_id: &str, server: &Server) -> CheckResult;
}

/// Persists one status row per server and answers the selection query.
#[async_trait]
pub trait SelectionStore: Send + Sync {
    /// Overwrite the row for `result.key` with the result.
    ///
    /// Rows are only created by [`SelectionStore::ensure_exists`]: a result
    /// for a key whose row was deleted meanwhile is dropped. Returns whether
    /// a row was written.
    async fn upsert(&self, result: &CheckResult) -> Result<bool>;

    /// Create an empty row for `key` unless one exists
    async fn ensure_exists(&self, key: &ServerKey) -> Result<()>;

    /// Delete every row whose key is not in `keys`.
    ///
    /// An empty `keys` deletes nothing. Returns the number of rows removed.
    async fn delete_not_in(&self, keys: &[ServerKey]) -> Result<usize>;

    /// Ordered candidates for the next check, see [`SelectionQuery`]
    async fn select_needing_check(&self, query: &SelectionQuery)
        -> Result<Vec<SelectionCandidate>>;
}

/// Live source of federation metadata.
pub trait MetadataProvider: Send + Sync {
    /// Current snapshot, or `None` before the first successful load
    fn snapshot(&self) -> Option<Arc<Metadata>>;

    /// Receiver that is marked changed whenever the snapshot changes.
    ///
    /// The value is a generation counter, not the snapshot itself.
    fn subscribe(&self) -> watch::Receiver<u64>;
}
