//! Check scheduler.
//!
//! One control loop multiplexes the dispatch timer, metadata change
//! notifications, priority wake-ups, shutdown and the reaping of finished
//! probes. Probes run as independent tasks bounded by a permit pool; a key is
//! never probed twice at once because every dispatch path goes through the
//! same in-flight set.
//!
//! ```text
//! AwaitingMetadata -> Running -> Draining -> Stopped
//! ```

mod tracker;

pub use tracker::PriorityRejected;

use chrono::Utc;
use governor::{Quota, RateLimiter};
use pinwatch_core::{
    FailureReason, MetadataProvider, SelectionQuery, SelectionStore, ServerKey, TrustChecker,
};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::{Result, SrvError};
use tracker::{InFlightGuard, Tracker};

const DISPATCH_BURST: NonZeroU32 = NonZeroU32::MIN.saturating_add(1);

type DispatchLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Shared between the handle and the control loop.
struct Inner {
    config: SchedulerConfig,
    store: Arc<dyn SelectionStore>,
    checker: Arc<dyn TrustChecker>,
    metadata: Arc<dyn MetadataProvider>,
    tracker: Arc<Tracker>,
    permits: Arc<Semaphore>,
    wake: Notify,
    limiter: DispatchLimiter,
}

/// Drives periodic trust checks of every server in the metadata.
pub struct Scheduler {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Scheduler {
    /// Create a scheduler. Nothing runs until [`Scheduler::start`].
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn SelectionStore>,
        checker: Arc<dyn TrustChecker>,
        metadata: Arc<dyn MetadataProvider>,
    ) -> Self {
        let per_minute = NonZeroU32::new(config.checks_per_minute).unwrap_or(NonZeroU32::MIN);
        // One spare cell absorbs timer jitter between ticks and the limiter clock.
        let quota = Quota::per_minute(per_minute).allow_burst(DISPATCH_BURST);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                tracker: Arc::new(Tracker::new(config.priority_capacity)),
                permits: Arc::new(Semaphore::new(config.max_parallel)),
                wake: Notify::new(),
                limiter: RateLimiter::direct(quota),
                config,
                store,
                checker,
                metadata,
            }),
            shutdown,
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the control loop on the current runtime.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SrvError::AlreadyRunning);
        }
        let task = tokio::spawn(run(Arc::clone(&self.inner), self.shutdown.subscribe()));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        Ok(())
    }

    /// Ask for `key` to be checked ahead of its turn.
    ///
    /// Never blocks. A key already queued is accepted without change; a key
    /// the current metadata does not list is rejected.
    pub fn request_priority(&self, key: ServerKey) -> std::result::Result<(), PriorityRejected> {
        let known = self
            .inner
            .metadata
            .snapshot()
            .is_some_and(|snapshot| snapshot.contains(&key));
        let queued = if known {
            self.inner.tracker.request_priority(key.clone())
        } else {
            Err(PriorityRejected::Unknown)
        };
        match queued {
            Ok(true) => {
                debug!(key = %key, "priority check queued");
                self.inner.wake.notify_one();
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(rejected) => {
                warn!(key = %key, reason = %rejected, "priority check rejected");
                Err(rejected)
            }
        }
    }

    /// Number of probes currently running
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.in_flight_len()
    }

    /// Number of queued priority requests
    pub fn priority_len(&self) -> usize {
        self.inner.tracker.priority_len()
    }

    /// Stop dispatching and wait for every running probe to finish.
    pub async fn stop(&self) {
        self.inner.tracker.stop();
        self.shutdown.send_replace(true);
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "scheduler task failed");
            }
        }
    }
}

/// Resolves once `stop` has been requested or the handle is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

async fn run(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut changes = inner.metadata.subscribe();

    // Wait for a snapshot with at least one entity.
    loop {
        changes.mark_unchanged();
        if inner.metadata.snapshot().is_some_and(|m| !m.is_empty()) {
            break;
        }
        debug!("waiting for metadata");
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    warn!("metadata source closed before the first snapshot");
                    return;
                }
            }
            () = stop_requested(&mut shutdown) => return,
        }
    }

    inner.resync().await;

    let period = inner.config.tick_period();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut probes = JoinSet::new();
    let mut metadata_open = true;

    info!(
        period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
        max_parallel = inner.config.max_parallel,
        "scheduler running"
    );

    loop {
        tokio::select! {
            () = stop_requested(&mut shutdown) => break,

            _ = ticker.tick() => {
                if inner.limiter.check().is_ok() {
                    inner.dispatch(&mut probes).await;
                } else {
                    debug!("tick skipped, dispatch budget spent");
                }
            }

            () = inner.wake.notified() => {
                if inner.limiter.check().is_ok() && inner.dispatch(&mut probes).await {
                    ticker.reset();
                }
            }

            changed = changes.changed(), if metadata_open => match changed {
                Ok(()) => inner.resync().await,
                Err(_) => {
                    warn!("metadata source closed, keeping last snapshot");
                    metadata_open = false;
                }
            },

            Some(joined) = probes.join_next(), if !probes.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "probe task failed");
                }
            }
        }
    }

    info!(in_flight = probes.len(), "scheduler draining");
    while let Some(joined) = probes.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "probe task failed");
        }
    }
    info!("scheduler stopped");
}

impl Inner {
    /// Try to start one probe. Returns true if a probe was spawned.
    async fn dispatch(&self, probes: &mut JoinSet<()>) -> bool {
        let Some(snapshot) = self.metadata.snapshot() else {
            return false;
        };

        let query = SelectionQuery {
            min_interval: self.config.min_check_interval,
            limit: self.config.max_parallel + 1,
            priority: self.tracker.priority_keys(),
            priority_min_interval: self.config.priority_min_interval,
            now: Utc::now(),
        };
        let candidates = match self.store.select_needing_check(&query).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "selecting servers to check failed");
                return false;
            }
        };

        // Keys missing from the snapshot are stale rows awaiting the next
        // resync; skip past them to the next candidate.
        let mut picked = None;
        for candidate in candidates {
            let key = candidate.key;
            if !self.tracker.try_mark(&key) {
                continue;
            }
            match snapshot.find_server(&key) {
                Some(server) => {
                    picked = Some((key, server.clone()));
                    break;
                }
                None => {
                    debug!(key = %key, "selected server is no longer in metadata");
                    self.tracker.unmark(&key);
                }
            }
        }
        let Some((key, server)) = picked else {
            return false;
        };

        let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            debug!(key = %key, "all probe slots busy");
            self.tracker.unmark(&key);
            return false;
        };

        let guard = InFlightGuard::new(Arc::clone(&self.tracker), key.clone(), permit);
        let checker = Arc::clone(&self.checker);
        let store = Arc::clone(&self.store);
        probes.spawn(async move {
            let _guard = guard;
            let result = checker.check(&key.entity_id, &server).await;
            info!(
                entity = %result.key.entity_id,
                base_uri = %result.key.base_uri,
                healthy = result.healthy,
                reason = result.reason.map_or("", FailureReason::as_str),
                "checked server"
            );
            match store.upsert(&result).await {
                Ok(true) => {}
                Ok(false) => debug!(key = %result.key, "server removed while checking"),
                Err(e) => warn!(key = %result.key, error = %e, "recording check result failed"),
            }
        });
        true
    }

    /// Make the store's rows match the current snapshot.
    async fn resync(&self) {
        let Some(snapshot) = self.metadata.snapshot() else {
            return;
        };
        let keys = snapshot.server_keys();

        for key in &keys {
            if let Err(e) = self.store.ensure_exists(key).await {
                warn!(key = %key, error = %e, "creating status row failed");
            }
        }

        let removed = if keys.is_empty() {
            debug!("metadata lists no servers, keeping stored rows");
            0
        } else {
            match self.store.delete_not_in(&keys).await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(error = %e, "removing stale status rows failed");
                    0
                }
            }
        };

        let dropped = self.tracker.retain_priority(|key| snapshot.contains(key));
        info!(
            servers = keys.len(),
            removed,
            dropped_priority = dropped,
            "synced servers from metadata"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryMetadataProvider;
    use async_trait::async_trait;
    use pinwatch_core::{CheckResult, Entity, Metadata, Pin, Server};
    use pinwatch_store::SqliteStore;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Records how many probes run per key and overall.
    #[derive(Default)]
    struct ScriptedChecker {
        delay: Duration,
        active: Mutex<HashMap<ServerKey, usize>>,
        calls: Mutex<Vec<ServerKey>>,
        overlaps: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
        finished: AtomicUsize,
    }

    impl ScriptedChecker {
        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                ..Self::default()
            })
        }

        fn calls(&self) -> Vec<ServerKey> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TrustChecker for ScriptedChecker {
        async fn check(&self, entity_id: &str, server: &Server) -> CheckResult {
            let key = ServerKey::new(entity_id, server.base_uri.as_str());
            {
                let mut active = self.active.lock().unwrap();
                let count = active.entry(key.clone()).or_default();
                *count += 1;
                if *count > 1 {
                    self.overlaps.fetch_add(1, Ordering::SeqCst);
                }
            }
            self.calls.lock().unwrap().push(key.clone());
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_running, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            *self.active.lock().unwrap().get_mut(&key).unwrap() -= 1;
            self.finished.fetch_add(1, Ordering::SeqCst);
            CheckResult::healthy(key, Utc::now(), None)
        }
    }

    const ENTITY: &str = "https://idp.example.org";

    fn key(n: usize) -> ServerKey {
        ServerKey::new(ENTITY, format!("https://s{n}.example.org/"))
    }

    fn metadata(servers: &[usize]) -> Metadata {
        Metadata {
            entities: vec![Entity {
                entity_id: ENTITY.to_string(),
                organization: None,
                organization_id: None,
                servers: servers
                    .iter()
                    .map(|n| Server::new(key(*n).base_uri, vec![Pin::sha256("digest")]))
                    .collect(),
            }],
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            max_parallel: 3,
            checks_per_minute: 6000,
            min_check_interval: Duration::from_secs(3600),
            priority_min_interval: Duration::from_secs(1),
            priority_capacity: 2,
        }
    }

    struct Fixture {
        scheduler: Scheduler,
        store: Arc<SqliteStore>,
        checker: Arc<ScriptedChecker>,
        metadata: Arc<MemoryMetadataProvider>,
    }

    fn fixture(config: SchedulerConfig, delay: Duration, initial: Option<Metadata>) -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let checker = ScriptedChecker::with_delay(delay);
        let metadata = Arc::new(match initial {
            Some(m) => MemoryMetadataProvider::with_metadata(m),
            None => MemoryMetadataProvider::new(),
        });
        let scheduler = Scheduler::new(
            config,
            store.clone(),
            checker.clone(),
            metadata.clone(),
        );
        Fixture {
            scheduler,
            store,
            checker,
            metadata,
        }
    }

    async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    async fn stored_keys(store: &SqliteStore) -> Vec<ServerKey> {
        store
            .all_statuses()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.key)
            .collect()
    }

    #[tokio::test]
    async fn test_no_key_probed_twice_at_once() {
        let config = SchedulerConfig {
            min_check_interval: Duration::ZERO,
            ..config()
        };
        let f = fixture(config, Duration::from_millis(30), Some(metadata(&[1, 2])));
        f.scheduler.start().unwrap();

        eventually("repeated checks", || f.checker.calls().len() >= 10).await;
        f.scheduler.stop().await;

        assert_eq!(f.checker.overlaps.load(Ordering::SeqCst), 0);
        assert!(f.checker.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_parallelism_bounded_by_permits() {
        let config = SchedulerConfig {
            max_parallel: 2,
            ..config()
        };
        let f = fixture(config, Duration::from_millis(100), Some(metadata(&[1, 2, 3, 4, 5, 6])));
        f.scheduler.start().unwrap();

        eventually("all servers checked", || {
            f.checker.finished.load(Ordering::SeqCst) >= 6
        })
        .await;
        f.scheduler.stop().await;

        assert!(f.checker.peak.load(Ordering::SeqCst) <= 2);
        let summary = f.store.summary().await.unwrap();
        assert_eq!(summary.healthy, 6);
    }

    #[tokio::test]
    async fn test_waits_for_metadata() {
        let f = fixture(config(), Duration::ZERO, None);
        f.scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.checker.calls().is_empty());
        assert!(stored_keys(&f.store).await.is_empty());

        f.metadata.publish(Metadata::default());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.checker.calls().is_empty());

        f.metadata.publish(metadata(&[1]));
        eventually("first check", || f.checker.calls() == vec![key(1)]).await;
        f.scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_priority_overrides_freshness() {
        let f = fixture(config(), Duration::ZERO, Some(metadata(&[1])));
        let recent = Utc::now() - chrono::TimeDelta::minutes(10);
        f.store.ensure_exists(&key(1)).await.unwrap();
        f.store
            .upsert(&CheckResult::healthy(key(1), recent, None))
            .await
            .unwrap();
        f.scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(f.checker.calls().is_empty(), "fresh server must not be due");

        f.scheduler.request_priority(key(1)).unwrap();
        eventually("priority check", || f.checker.calls().len() == 1).await;
        eventually("priority entry cleared", || f.scheduler.priority_len() == 0).await;
        f.scheduler.stop().await;

        let status = f.store.get_status(&key(1)).await.unwrap().unwrap();
        assert!(status.last_checked.unwrap() > recent);
    }

    #[tokio::test]
    async fn test_priority_capacity_frees_after_check() {
        let f = fixture(config(), Duration::ZERO, Some(metadata(&[1, 2, 3])));
        f.scheduler.request_priority(key(1)).unwrap();
        f.scheduler.request_priority(key(2)).unwrap();
        f.scheduler.request_priority(key(1)).unwrap();
        assert_eq!(f.scheduler.request_priority(key(3)), Err(PriorityRejected::Full));
        assert_eq!(f.scheduler.priority_len(), 2);

        f.scheduler.start().unwrap();
        eventually("priority drained", || f.scheduler.priority_len() == 0).await;
        assert_eq!(f.scheduler.request_priority(key(3)), Ok(()));

        let calls = f.checker.calls();
        assert_eq!(&calls[..2], &[key(1), key(2)]);
        f.scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_resync_follows_metadata() {
        let f = fixture(config(), Duration::ZERO, Some(metadata(&[1, 2])));
        f.store.ensure_exists(&key(9)).await.unwrap();
        f.scheduler.start().unwrap();

        let store = f.store.clone();
        tokio::time::timeout(Duration::from_secs(10), async {
            while store.summary().await.unwrap().healthy < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(stored_keys(&f.store).await, vec![key(1), key(2)]);

        // An entity without servers must not wipe the table.
        f.metadata.publish(metadata(&[]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stored_keys(&f.store).await, vec![key(1), key(2)]);

        f.metadata.publish(metadata(&[1]));
        tokio::time::timeout(Duration::from_secs(10), async {
            while stored_keys(&store).await != vec![key(1)] {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        f.scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_running_probes() {
        let f = fixture(config(), Duration::from_millis(300), Some(metadata(&[1])));
        f.scheduler.start().unwrap();
        eventually("probe running", || f.scheduler.in_flight() == 1).await;

        f.scheduler.stop().await;

        assert_eq!(f.checker.finished.load(Ordering::SeqCst), 1);
        assert_eq!(f.scheduler.in_flight(), 0);
        let status = f.store.get_status(&key(1)).await.unwrap().unwrap();
        assert_eq!(status.healthy, Some(true));
        assert_eq!(f.scheduler.request_priority(key(1)), Err(PriorityRejected::Stopped));
    }

    fn calls_for(checker: &ScriptedChecker, wanted: &ServerKey) -> usize {
        checker.calls().iter().filter(|k| *k == wanted).count()
    }

    #[tokio::test]
    async fn test_server_removed_mid_check_stays_removed() {
        let config = SchedulerConfig {
            max_parallel: 1,
            min_check_interval: Duration::from_secs(1),
            ..config()
        };
        let f = fixture(config, Duration::from_millis(300), Some(metadata(&[1, 2, 3])));
        f.scheduler.start().unwrap();
        eventually("s1 in flight", || f.checker.calls() == vec![key(1)]).await;

        f.metadata.publish(metadata(&[2, 3]));

        // s2 coming due a second time means ordinary checks kept flowing.
        eventually("s2 rechecked", || calls_for(&f.checker, &key(2)) >= 2).await;
        f.scheduler.stop().await;

        assert_eq!(stored_keys(&f.store).await, vec![key(2), key(3)]);
        assert_eq!(calls_for(&f.checker, &key(1)), 1);
    }

    #[tokio::test]
    async fn test_row_missing_from_metadata_is_skipped() {
        let config = SchedulerConfig {
            max_parallel: 1,
            ..config()
        };
        let f = fixture(config, Duration::from_millis(100), Some(metadata(&[1, 2, 3])));
        f.scheduler.start().unwrap();
        eventually("first check", || !f.checker.calls().is_empty()).await;

        // Never checked and sorting first, so it heads every selection
        // until the next resync.
        let orphan = ServerKey::new(ENTITY, "https://orphan.example.org/");
        f.store.ensure_exists(&orphan).await.unwrap();

        eventually("all listed servers checked", || {
            f.checker.finished.load(Ordering::SeqCst) >= 3
        })
        .await;
        f.scheduler.stop().await;

        assert_eq!(calls_for(&f.checker, &orphan), 0);
        assert_eq!(f.scheduler.in_flight(), 0);
        let status = f.store.get_status(&orphan).await.unwrap().unwrap();
        assert_eq!(status.last_checked, None);
    }

    #[tokio::test]
    async fn test_unknown_priority_key_rejected() {
        let f = fixture(config(), Duration::ZERO, None);
        assert_eq!(f.scheduler.request_priority(key(1)), Err(PriorityRejected::Unknown));

        f.metadata.publish(metadata(&[1, 2]));
        f.scheduler.start().unwrap();
        assert_eq!(f.scheduler.request_priority(key(8)), Err(PriorityRejected::Unknown));
        assert_eq!(f.scheduler.request_priority(key(9)), Err(PriorityRejected::Unknown));
        assert_eq!(f.scheduler.priority_len(), 0);

        assert_eq!(f.scheduler.request_priority(key(1)), Ok(()));
        assert_eq!(f.scheduler.request_priority(key(2)), Ok(()));
        f.scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_priority_key_waits_for_its_interval() {
        let config = SchedulerConfig {
            priority_min_interval: Duration::from_secs(3600),
            ..config()
        };
        let f = fixture(config, Duration::ZERO, Some(metadata(&[1])));
        let recent = Utc::now() - chrono::TimeDelta::seconds(10);
        f.store.ensure_exists(&key(1)).await.unwrap();
        f.store
            .upsert(&CheckResult::healthy(key(1), recent, None))
            .await
            .unwrap();
        f.scheduler.start().unwrap();

        f.scheduler.request_priority(key(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(f.checker.calls().is_empty());
        assert_eq!(f.scheduler.priority_len(), 1);
        f.scheduler.stop().await;
        assert_eq!(f.scheduler.priority_len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_rate_bounded_under_priority_load() {
        let servers: Vec<usize> = (0..30).collect();
        let config = SchedulerConfig {
            max_parallel: 30,
            checks_per_minute: 600,
            priority_capacity: 64,
            ..config()
        };
        let f = fixture(config, Duration::ZERO, Some(metadata(&servers)));
        f.scheduler.start().unwrap();

        let started = tokio::time::Instant::now();
        let mut n = 0;
        while started.elapsed() < Duration::from_secs(1) {
            let _ = f.scheduler.request_priority(key(n % servers.len()));
            n += 1;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let calls = f.checker.calls().len();
        f.scheduler.stop().await;

        // 600/min is one dispatch per 100ms on top of the two-cell burst.
        assert!(calls <= 13, "{calls} checks dispatched in one second");
        assert!(calls >= 3, "only {calls} checks dispatched");
    }

    #[tokio::test]
    async fn test_start_twice() {
        let f = fixture(config(), Duration::ZERO, None);
        f.scheduler.start().unwrap();
        assert!(matches!(f.scheduler.start(), Err(SrvError::AlreadyRunning)));
        f.scheduler.stop().await;
    }
}
