use async_trait::async_trait;
use pinwatch_core::{
    CheckResult, PinwatchError, Result, SelectionCandidate, SelectionQuery, SelectionStore,
    ServerKey, ServerStatus, StatusSummary,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

use crate::schema::{optional_time, status_from_row, CREATE_TABLES, STATUS_COLUMNS};

/// Status store backed by a single SQLite connection.
///
/// Statements run on the blocking pool; the connection mutex serializes
/// them, so concurrent upserts of one key resolve as last-write-wins.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_error)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(store_error)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(store_error)?;

        let store = Self::init(conn)?;
        info!(path = %path.display(), "status store opened");
        Ok(store)
    }

    /// A private database that lives as long as the store
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(store_error)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(CREATE_TABLES).map_err(store_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await
        .map_err(|e| PinwatchError::StoreTask(e.to_string()))?
        .map_err(store_error)
    }

    /// Status row for `key`, if the server is known
    pub async fn get_status(&self, key: &ServerKey) -> Result<Option<ServerStatus>> {
        let key = key.clone();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {STATUS_COLUMNS} FROM server_status
                     WHERE entity_id = ?1 AND base_uri = ?2"
                ),
                params![key.entity_id, key.base_uri],
                status_from_row,
            )
            .optional()
        })
        .await
    }

    /// Every row, ordered by entity then base URI
    pub async fn all_statuses(&self) -> Result<Vec<ServerStatus>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {STATUS_COLUMNS} FROM server_status ORDER BY entity_id, base_uri"
            ))?;
            let rows = stmt.query_map([], status_from_row)?;
            rows.collect()
        })
        .await
    }

    /// Row counts per health state
    pub async fn summary(&self) -> Result<StatusSummary> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT healthy, COUNT(*) FROM server_status GROUP BY healthy")?;
            let mut rows = stmt.query([])?;
            let mut summary = StatusSummary::default();
            while let Some(row) = rows.next()? {
                let count = usize::try_from(row.get::<_, i64>(1)?).unwrap_or_default();
                match row.get::<_, Option<bool>>(0)? {
                    Some(true) => summary.healthy += count,
                    Some(false) => summary.unhealthy += count,
                    None => summary.unchecked += count,
                }
            }
            Ok(summary)
        })
        .await
    }
}

#[async_trait]
impl SelectionStore for SqliteStore {
    async fn upsert(&self, result: &CheckResult) -> Result<bool> {
        let status = ServerStatus::from(result);
        let updated = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE server_status SET
                         last_checked = ?3,
                         healthy = ?4,
                         reason = ?5,
                         detail = ?6,
                         cert_cn = ?7,
                         cert_expires = ?8,
                         cert_fingerprint = ?9
                     WHERE entity_id = ?1 AND base_uri = ?2",
                    params![
                        status.key.entity_id,
                        status.key.base_uri,
                        status.last_checked.map(|t| t.timestamp_millis()),
                        status.healthy,
                        status.reason.map(|r| r.as_str()),
                        status.detail,
                        status.cert_common_name,
                        status.cert_expires.map(|t| t.timestamp_millis()),
                        status.cert_fingerprint,
                    ],
                )
            })
            .await?;
        if updated == 0 {
            debug!(key = %result.key, "no status row, result dropped");
        }
        Ok(updated > 0)
    }

    async fn ensure_exists(&self, key: &ServerKey) -> Result<()> {
        let key = key.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO server_status (entity_id, base_uri) VALUES (?1, ?2)",
                params![key.entity_id, key.base_uri],
            )
            .map(drop)
        })
        .await
    }

    async fn delete_not_in(&self, keys: &[ServerKey]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keep: HashSet<ServerKey> = keys.iter().cloned().collect();
        let removed = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let existing = {
                    let mut stmt = tx.prepare("SELECT entity_id, base_uri FROM server_status")?;
                    let rows = stmt.query_map([], |row| {
                        Ok(ServerKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };
                let mut removed = 0;
                {
                    let mut delete = tx.prepare(
                        "DELETE FROM server_status WHERE entity_id = ?1 AND base_uri = ?2",
                    )?;
                    for key in existing.iter().filter(|k| !keep.contains(*k)) {
                        removed += delete.execute(params![key.entity_id, key.base_uri])?;
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        if removed > 0 {
            debug!(removed, "deleted rows for servers no longer in metadata");
        }
        Ok(removed)
    }

    async fn select_needing_check(
        &self,
        query: &SelectionQuery,
    ) -> Result<Vec<SelectionCandidate>> {
        let limit = query.limit;
        let priority = query.priority.clone();
        let priority_cutoff = query.priority_cutoff().timestamp_millis();
        let ordinary_cutoff = query.ordinary_cutoff().timestamp_millis();

        self.with_conn(move |conn| {
            let mut picked = Vec::with_capacity(limit);
            let mut seen = HashSet::new();

            // Priority keys first, in request order, once their own window has passed.
            {
                let mut stmt = conn.prepare_cached(
                    "SELECT last_checked FROM server_status
                     WHERE entity_id = ?1 AND base_uri = ?2
                       AND (last_checked IS NULL OR last_checked < ?3)",
                )?;
                for key in &priority {
                    if picked.len() >= limit {
                        break;
                    }
                    if seen.contains(key) {
                        continue;
                    }
                    let row = stmt
                        .query_row(
                            params![key.entity_id, key.base_uri, priority_cutoff],
                            |row| optional_time(row, 0),
                        )
                        .optional()?;
                    if let Some(last_checked) = row {
                        seen.insert(key.clone());
                        picked.push(SelectionCandidate {
                            key: key.clone(),
                            last_checked,
                        });
                    }
                }
            }

            if picked.len() < limit {
                // Over-fetch by the priority count so skipping already picked keys
                // cannot starve the tail.
                let fetch = i64::try_from(limit + priority.len()).unwrap_or(i64::MAX);
                let mut stmt = conn.prepare_cached(
                    "SELECT entity_id, base_uri, last_checked FROM server_status
                     WHERE last_checked IS NULL OR last_checked < ?1
                     ORDER BY last_checked IS NOT NULL, last_checked ASC, entity_id, base_uri
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![ordinary_cutoff, fetch], |row| {
                    Ok(SelectionCandidate {
                        key: ServerKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                        last_checked: optional_time(row, 2)?,
                    })
                })?;
                for candidate in rows {
                    let candidate = candidate?;
                    if seen.contains(&candidate.key) {
                        continue;
                    }
                    picked.push(candidate);
                    if picked.len() >= limit {
                        break;
                    }
                }
            }

            Ok(picked)
        })
        .await
    }
}

fn store_error(e: rusqlite::Error) -> PinwatchError {
    PinwatchError::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};
    use pinwatch_core::{CertificateInfo, FailureReason, HealthState};

    fn at(offset_secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
            + TimeDelta::seconds(offset_secs)
    }

    fn key(n: u32) -> ServerKey {
        ServerKey::new(format!("https://e{n}.example.org"), format!("https://s{n}.example.org/"))
    }

    fn query(now: DateTime<Utc>, limit: usize, priority: Vec<ServerKey>) -> SelectionQuery {
        SelectionQuery {
            min_interval: Duration::from_secs(5 * 3600),
            limit,
            priority,
            priority_min_interval: Duration::from_secs(60),
            now,
        }
    }

    async fn checked(store: &SqliteStore, key: &ServerKey, when: DateTime<Utc>) {
        store.ensure_exists(key).await.unwrap();
        assert!(store
            .upsert(&CheckResult::healthy(key.clone(), when, None))
            .await
            .unwrap());
    }

    fn keys(candidates: &[SelectionCandidate]) -> Vec<ServerKey> {
        candidates.iter().map(|c| c.key.clone()).collect()
    }

    #[tokio::test]
    async fn test_never_checked_first_then_oldest() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = at(100_000);
        checked(&store, &key(1), now - TimeDelta::hours(6)).await;
        checked(&store, &key(2), now - TimeDelta::hours(9)).await;
        store.ensure_exists(&key(3)).await.unwrap();
        checked(&store, &key(4), now - TimeDelta::hours(1)).await;

        let picked = store.select_needing_check(&query(now, 10, vec![])).await.unwrap();
        assert_eq!(keys(&picked), vec![key(3), key(2), key(1)]);
        assert_eq!(picked[0].last_checked, None);
        assert_eq!(picked[1].last_checked, Some(now - TimeDelta::hours(9)));
    }

    #[tokio::test]
    async fn test_priority_overrides_freshness() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = at(100_000);
        checked(&store, &key(1), now - TimeDelta::minutes(30)).await;
        store.ensure_exists(&key(2)).await.unwrap();

        let picked = store
            .select_needing_check(&query(now, 5, vec![key(1)]))
            .await
            .unwrap();
        assert_eq!(keys(&picked), vec![key(1), key(2)]);
    }

    #[tokio::test]
    async fn test_priority_respects_its_own_interval() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = at(100_000);
        checked(&store, &key(1), now - TimeDelta::seconds(10)).await;

        let picked = store
            .select_needing_check(&query(now, 5, vec![key(1)]))
            .await
            .unwrap();
        assert!(picked.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_priority_key_is_ignored() {
        let store = SqliteStore::open_in_memory().unwrap();
        let picked = store
            .select_needing_check(&query(at(0), 5, vec![key(9)]))
            .await
            .unwrap();
        assert!(picked.is_empty());
    }

    #[tokio::test]
    async fn test_limit_caps_priority_entries() {
        let store = SqliteStore::open_in_memory().unwrap();
        for n in 0..6 {
            store.ensure_exists(&key(n)).await.unwrap();
        }
        let priority = vec![key(5), key(4), key(3), key(2)];

        let picked = store
            .select_needing_check(&query(at(0), 3, priority))
            .await
            .unwrap();
        assert_eq!(keys(&picked), vec![key(5), key(4), key(3)]);
    }

    #[tokio::test]
    async fn test_priority_keys_not_repeated_in_ordinary_tail() {
        let store = SqliteStore::open_in_memory().unwrap();
        for n in 0..3 {
            store.ensure_exists(&key(n)).await.unwrap();
        }

        let picked = store
            .select_needing_check(&query(at(0), 10, vec![key(2), key(2)]))
            .await
            .unwrap();
        assert_eq!(keys(&picked), vec![key(2), key(0), key(1)]);
    }

    #[tokio::test]
    async fn test_delete_not_in() {
        let store = SqliteStore::open_in_memory().unwrap();
        for n in 0..4 {
            store.ensure_exists(&key(n)).await.unwrap();
        }

        assert_eq!(store.delete_not_in(&[]).await.unwrap(), 0);
        assert_eq!(store.all_statuses().await.unwrap().len(), 4);

        assert_eq!(store.delete_not_in(&[key(1), key(3), key(7)]).await.unwrap(), 2);
        let left: Vec<_> = store
            .all_statuses()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(left, vec![key(1), key(3)]);
    }

    #[tokio::test]
    async fn test_ensure_exists_keeps_history() {
        let store = SqliteStore::open_in_memory().unwrap();
        checked(&store, &key(1), at(0)).await;
        store.ensure_exists(&key(1)).await.unwrap();

        let status = store.get_status(&key(1)).await.unwrap().unwrap();
        assert_eq!(status.last_checked, Some(at(0)));
        assert_eq!(status.health(), HealthState::Healthy);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let failing = CheckResult::unhealthy(
            key(1),
            at(0),
            FailureReason::Expired,
            "certificate expired on 2023-01-01T00:00:00Z",
        )
        .with_certificate(CertificateInfo {
            common_name: Some("s1.example.org".to_string()),
            not_after: at(-86_400),
            fingerprint: "fp".to_string(),
        });
        store.ensure_exists(&key(1)).await.unwrap();
        store.upsert(&failing).await.unwrap();
        store.upsert(&failing).await.unwrap();

        let status = store.get_status(&key(1)).await.unwrap().unwrap();
        assert_eq!(status, ServerStatus::from(&failing));

        store
            .upsert(&CheckResult::healthy(key(1), at(60), None))
            .await
            .unwrap();
        let status = store.get_status(&key(1)).await.unwrap().unwrap();
        assert_eq!(status.healthy, Some(true));
        assert_eq!(status.reason, None);
        assert_eq!(status.cert_fingerprint, None);
        assert_eq!(status.last_checked, Some(at(60)));
        assert_eq!(store.all_statuses().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_does_not_recreate_deleted_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_exists(&key(1)).await.unwrap();
        store.ensure_exists(&key(2)).await.unwrap();
        assert_eq!(store.delete_not_in(&[key(2)]).await.unwrap(), 1);

        // A check of key 1 that was running when its row went away.
        let written = store
            .upsert(&CheckResult::healthy(key(1), at(0), None))
            .await
            .unwrap();
        assert!(!written);
        assert!(store.get_status(&key(1)).await.unwrap().is_none());
        assert_eq!(store.summary().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn test_summary() {
        let store = SqliteStore::open_in_memory().unwrap();
        checked(&store, &key(1), at(0)).await;
        store.ensure_exists(&key(2)).await.unwrap();
        store
            .upsert(&CheckResult::unhealthy(key(2), at(0), FailureReason::PinMismatch, "x"))
            .await
            .unwrap();
        store.ensure_exists(&key(3)).await.unwrap();
        store.ensure_exists(&key(4)).await.unwrap();

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.unhealthy, 1);
        assert_eq!(summary.unchecked, 2);
        assert_eq!(summary.total(), 4);
        assert!(store.get_status(&key(9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pinwatch.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            checked(&store, &key(1), at(0)).await;
        }

        let store = SqliteStore::open(&path).unwrap();
        let status = store.get_status(&key(1)).await.unwrap().unwrap();
        assert_eq!(status.last_checked, Some(at(0)));
    }
}
