//! Metadata sources.
//!
//! [`FileMetadataProvider`] re-reads a JSON document from disk on a fixed
//! period. [`MemoryMetadataProvider`] is fed by its owner. Both notify
//! subscribers only when the parsed snapshot actually changes.

use pinwatch_core::{Metadata, MetadataProvider};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{Result, SrvError};

/// Current snapshot plus a generation counter for subscribers.
#[derive(Debug)]
struct Published {
    current: RwLock<Option<Arc<Metadata>>>,
    generation: watch::Sender<u64>,
}

impl Published {
    fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            current: RwLock::new(None),
            generation,
        }
    }

    fn snapshot(&self) -> Option<Arc<Metadata>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the snapshot; returns false when nothing changed.
    fn publish(&self, metadata: Metadata) -> bool {
        {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            if current.as_deref() == Some(&metadata) {
                return false;
            }
            *current = Some(Arc::new(metadata));
        }
        self.generation.send_modify(|generation| *generation += 1);
        true
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}

/// Read and parse a metadata document.
pub async fn load_metadata(path: &Path) -> Result<Metadata> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SrvError::Metadata(format!("failed to read {}: {e}", path.display())))?;
    Metadata::from_json(&content)
        .map_err(|e| SrvError::Metadata(format!("failed to parse {}: {e}", path.display())))
}

/// Metadata read from a file and refreshed periodically.
#[derive(Debug)]
pub struct FileMetadataProvider {
    published: Arc<Published>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FileMetadataProvider {
    /// Load `path` once, then keep reloading it every `reload`.
    ///
    /// A failed load is logged and leaves the previous snapshot (or none) in
    /// place, so the monitor simply waits for a readable document.
    pub async fn start(path: impl Into<PathBuf>, reload: Duration) -> Self {
        let path = path.into();
        let published = Arc::new(Published::new());
        reload_once(&path, &published).await;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(reload_loop(
            path,
            reload,
            Arc::clone(&published),
            shutdown_rx,
        ));

        Self {
            published,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop reloading. The last snapshot stays readable.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "metadata reload task failed");
            }
        }
    }
}

impl MetadataProvider for FileMetadataProvider {
    fn snapshot(&self) -> Option<Arc<Metadata>> {
        self.published.snapshot()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.published.subscribe()
    }
}

async fn reload_loop(
    path: PathBuf,
    reload: Duration,
    published: Arc<Published>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + reload, reload);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => reload_once(&path, &published).await,
            _ = shutdown.changed() => break,
        }
    }
    debug!(path = %path.display(), "metadata reloading stopped");
}

async fn reload_once(path: &Path, published: &Published) {
    match load_metadata(path).await {
        Ok(metadata) => {
            let entities = metadata.entities.len();
            let servers = metadata.server_keys().len();
            if published.publish(metadata) {
                info!(path = %path.display(), entities, servers, "metadata updated");
            } else {
                debug!(path = %path.display(), "metadata unchanged");
            }
        }
        Err(e) => warn!(error = %e, "metadata reload failed, keeping previous snapshot"),
    }
}

/// Metadata held in memory and replaced by its owner.
#[derive(Debug)]
pub struct MemoryMetadataProvider {
    published: Published,
}

impl MemoryMetadataProvider {
    /// A provider with no snapshot yet
    #[must_use]
    pub fn new() -> Self {
        Self {
            published: Published::new(),
        }
    }

    /// A provider that starts with `metadata`
    #[must_use]
    pub fn with_metadata(metadata: Metadata) -> Self {
        let provider = Self::new();
        provider.publish(metadata);
        provider
    }

    /// Replace the snapshot; subscribers are notified if it changed.
    pub fn publish(&self, metadata: Metadata) -> bool {
        self.published.publish(metadata)
    }
}

impl Default for MemoryMetadataProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataProvider for MemoryMetadataProvider {
    fn snapshot(&self) -> Option<Arc<Metadata>> {
        self.published.snapshot()
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.published.subscribe()
    }
}
