//! Process-wide watcher registry.
//!
//! One watcher per configured server: a source task feeding a dispatcher
//! task through a bounded queue, with a shared status cell and metrics.
//! `start` is idempotent; an optional health loop restarts watchers whose
//! source task has died (auth failures excepted — retrying a rejected
//! password is noise).

use crate::config::{ServerEntry, StoreChoice};
use crate::dispatcher::Dispatcher;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::parser::ParserSet;
use crate::source::SourceError;
use crate::status::{StatusCell, WatcherStatus};
use crate::store::{EventStore, MemoryStore, RedisStore, StoreError};
use aegis_events::EventBus;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Config and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub dispatcher_queue_size: usize,
    pub metrics_window: Duration,
    /// `None` disables the restart scan.
    pub health_check_interval: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            dispatcher_queue_size: 1000,
            metrics_window: crate::metrics::DEFAULT_WINDOW,
            health_check_interval: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("unknown server: {0}")]
    UnknownServer(Uuid),
}

/// One row of a status query.
#[derive(Debug, Clone, Serialize)]
pub struct WatcherSummary {
    pub id: Uuid,
    pub name: String,
    pub status: WatcherStatus,
    pub last_error: Option<String>,
    /// RFC 3339 wall-clock time the watcher was (re)started.
    pub started_at: String,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct WatcherHandle {
    entry: ServerEntry,
    status: StatusCell,
    metrics: Arc<MetricsCollector>,
    shutdown: watch::Sender<bool>,
    source_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
    started_at: chrono::DateTime<chrono::Utc>,
}

pub struct WatcherManager {
    bus: EventBus,
    cfg: ManagerConfig,
    watchers: Mutex<HashMap<Uuid, WatcherHandle>>,
}

impl WatcherManager {
    pub fn new(bus: EventBus, cfg: ManagerConfig) -> Arc<Self> {
        Arc::new(WatcherManager {
            bus,
            cfg,
            watchers: Mutex::new(HashMap::new()),
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Start a watcher for `entry`.  Starting an already-running server is
    /// a no-op; a dead one is replaced.
    pub async fn start(&self, entry: ServerEntry) -> Result<(), ManagerError> {
        let mut watchers = self.watchers.lock().await;
        if let Some(existing) = watchers.get(&entry.id) {
            if !existing.source_task.is_finished() {
                return Ok(());
            }
            if let Some(dead) = watchers.remove(&entry.id) {
                let _ = dead.shutdown.send(true);
            }
        }
        info!(server_id = %entry.id, name = %entry.name, "starting watcher");
        let handle = self.spawn_watcher(entry.clone()).await?;
        watchers.insert(entry.id, handle);
        Ok(())
    }

    async fn spawn_watcher(&self, entry: ServerEntry) -> Result<WatcherHandle, ManagerError> {
        let store: Arc<dyn EventStore> = match &entry.store {
            StoreChoice::Memory => Arc::new(MemoryStore::new()),
            StoreChoice::Redis { url } => Arc::new(RedisStore::connect(url, entry.id).await?),
        };
        let status = StatusCell::new();
        let metrics = Arc::new(MetricsCollector::new(self.cfg.metrics_window));
        let (line_tx, line_rx) = mpsc::channel(self.cfg.dispatcher_queue_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = Dispatcher::new(
            entry.id,
            ParserSet::standard(),
            store,
            self.bus.clone(),
            Arc::clone(&metrics),
            status.clone(),
        );
        let dispatcher_task = tokio::spawn(dispatcher.run(line_rx, shutdown_rx.clone()));

        let source = entry.source.build();
        let source_status = status.clone();
        let server_id = entry.id;
        let source_task = tokio::spawn(async move {
            match source.run(line_tx, shutdown_rx, source_status.clone()).await {
                Ok(()) => source_status.set(WatcherStatus::Stopped),
                Err(e @ SourceError::AuthFailed(_)) => {
                    // Status was already flipped by the source; keep the
                    // error visible and do not mask it with Stopped.
                    error!(server_id = %server_id, error = %e, "source rejected, watcher halted");
                }
                Err(e) => {
                    source_status.set(WatcherStatus::Stopped);
                    source_status.record_error(e.to_string());
                    error!(server_id = %server_id, error = %e, "source terminated");
                }
            }
        });

        Ok(WatcherHandle {
            entry,
            status,
            metrics,
            shutdown: shutdown_tx,
            source_task,
            dispatcher_task,
            started_at: chrono::Utc::now(),
        })
    }

    /// Stop one watcher and wait for its tasks to exit.
    pub async fn stop(&self, id: Uuid) -> Result<(), ManagerError> {
        let handle = {
            let mut watchers = self.watchers.lock().await;
            watchers.remove(&id).ok_or(ManagerError::UnknownServer(id))?
        };
        info!(server_id = %id, "stopping watcher");
        let _ = handle.shutdown.send(true);
        let _ = handle.source_task.await;
        let _ = handle.dispatcher_task.await;
        handle.status.set(WatcherStatus::Stopped);
        Ok(())
    }

    /// Stop every watcher.
    pub async fn stop_all(&self) {
        let handles: Vec<WatcherHandle> = {
            let mut watchers = self.watchers.lock().await;
            watchers.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            let _ = handle.shutdown.send(true);
        }
        for handle in handles {
            let _ = handle.source_task.await;
            let _ = handle.dispatcher_task.await;
        }
    }

    /// Servers whose source task is still alive.
    pub async fn list_running(&self) -> Vec<(Uuid, String)> {
        let watchers = self.watchers.lock().await;
        watchers
            .values()
            .filter(|h| !h.source_task.is_finished())
            .map(|h| (h.entry.id, h.entry.name.clone()))
            .collect()
    }

    pub async fn status(&self, id: Uuid) -> Option<WatcherStatus> {
        let watchers = self.watchers.lock().await;
        watchers.get(&id).map(|h| h.status.status())
    }

    pub async fn last_error(&self, id: Uuid) -> Option<String> {
        let watchers = self.watchers.lock().await;
        watchers.get(&id).and_then(|h| h.status.last_error())
    }

    pub async fn metrics(&self, id: Uuid) -> Option<MetricsSnapshot> {
        let watchers = self.watchers.lock().await;
        watchers.get(&id).map(|h| h.metrics.snapshot())
    }

    /// Status rows for every registered watcher.
    pub async fn summaries(&self) -> Vec<WatcherSummary> {
        let watchers = self.watchers.lock().await;
        let mut rows: Vec<WatcherSummary> = watchers
            .values()
            .map(|h| WatcherSummary {
                id: h.entry.id,
                name: h.entry.name.clone(),
                status: h.status.status(),
                last_error: h.status.last_error(),
                started_at: h.started_at.to_rfc3339(),
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Spawn the periodic restart scan.
    pub fn spawn_health_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                manager.health_pass().await;
            }
        })
    }

    async fn health_pass(&self) {
        let mut watchers = self.watchers.lock().await;
        let dead: Vec<Uuid> = watchers
            .iter()
            .filter(|(_, h)| {
                h.source_task.is_finished() && h.status.status() != WatcherStatus::AuthFailed
            })
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            let Some(old) = watchers.remove(&id) else {
                continue;
            };
            let _ = old.shutdown.send(true);
            warn!(server_id = %id, name = %old.entry.name, "watcher died, restarting");
            match self.spawn_watcher(old.entry.clone()).await {
                Ok(handle) => {
                    watchers.insert(id, handle);
                }
                Err(e) => {
                    error!(server_id = %id, error = %e, "watcher restart failed");
                    old.status.record_error(format!("restart failed: {e}"));
                    watchers.insert(id, old);
                }
            }
        }
    }
}
