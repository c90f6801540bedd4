//! Process wiring: store, metadata source, checker and scheduler.

use pinwatch_core::{MetadataProvider, TrustChecker};
use pinwatch_probe::{StaticChecker, TlsTrustChecker};
use pinwatch_store::SqliteStore;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::metadata::FileMetadataProvider;
use crate::scheduler::{PriorityRejected, Scheduler};
use crate::Result;

/// A running monitor.
pub struct Monitor {
    scheduler: Scheduler,
    metadata: Arc<FileMetadataProvider>,
    store: Arc<SqliteStore>,
}

impl Monitor {
    /// Open the store, start watching the metadata file and start checking.
    pub async fn start(config: &MonitorConfig) -> Result<Self> {
        let checker = Arc::new(TlsTrustChecker::new(config.tls_timeout()));
        Self::start_with_checker(config, checker).await
    }

    /// Like [`Monitor::start`], but every server is reported healthy without
    /// any network access. Exercises metadata sync and scheduling only.
    pub async fn start_dry_run(config: &MonitorConfig) -> Result<Self> {
        warn!("dry run: servers are not contacted and always reported healthy");
        Self::start_with_checker(config, Arc::new(StaticChecker)).await
    }

    /// Start with a caller-supplied checker.
    pub async fn start_with_checker(
        config: &MonitorConfig,
        checker: Arc<dyn TrustChecker>,
    ) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(&config.database_path)?);
        let metadata = Arc::new(
            FileMetadataProvider::start(&config.metadata_path, config.metadata_reload()).await,
        );

        let scheduler = Scheduler::new(
            config.scheduler(),
            store.clone(),
            checker,
            metadata.clone(),
        );
        scheduler.start()?;

        info!(
            metadata = %config.metadata_path.display(),
            database = %config.database_path.display(),
            checks_per_minute = config.checks_per_minute,
            max_parallel = config.max_parallel_checks,
            "monitor started"
        );

        Ok(Self {
            scheduler,
            metadata,
            store,
        })
    }

    /// Queue a priority check of every published server at `base_uri`.
    ///
    /// Returns how many servers were queued; zero when no entity lists it.
    pub fn request_recheck(&self, base_uri: &str) -> std::result::Result<usize, PriorityRejected> {
        let Some(snapshot) = self.metadata.snapshot() else {
            return Ok(0);
        };
        let mut queued = 0;
        for key in snapshot
            .server_keys()
            .into_iter()
            .filter(|key| key.base_uri == base_uri)
        {
            self.scheduler.request_priority(key)?;
            queued += 1;
        }
        Ok(queued)
    }

    /// The running scheduler, for priority requests and introspection
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The status store
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    /// Stop the scheduler (waiting for running probes) and the metadata reloads.
    pub async fn shutdown(self) {
        self.scheduler.stop().await;
        self.metadata.stop().await;
        info!("monitor stopped");
    }
}
