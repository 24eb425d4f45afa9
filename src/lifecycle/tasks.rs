//! Background task tracking and startup.
//!
//! # Responsibilities
//! - Track every long-running maintenance or extension task in one group
//! - Start periodic GC per store and the extension hooks after the topology
//!   is fully built
//! - Let shutdown block until the group is empty
//!
//! # Design Decisions
//! - The group is a counter published on a watch channel; "empty" is zero
//! - Periodic GC polls the shutdown listener between passes and exits on it
//! - Sync is enabled against the whole topology, never per store

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};

use crate::config::RegistryConfig;
use crate::extensions::Extensions;
use crate::lifecycle::shutdown::{Shutdown, ShutdownListener};
use crate::observability::metrics;
use crate::storage::{ImageStore, StorageTopology};

#[derive(Debug)]
struct Group {
    active: watch::Sender<usize>,
    names: Mutex<BTreeMap<u64, String>>,
    next_id: AtomicU64,
}

/// The set of running background tasks.
///
/// Cloning shares the same group. The count goes up when a task is spawned
/// and down when it finishes, panics included.
#[derive(Debug, Clone)]
pub struct BackgroundTasks {
    group: Arc<Group>,
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (active, _) = watch::channel(0);
        Self {
            group: Arc::new(Group {
                active,
                names: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn `fut` on the runtime and add it to the group.
    pub fn spawn<F>(&self, name: impl Into<String>, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let id = self.group.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(task = %name, "starting background task");

        self.group
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, name);
        self.group.active.send_modify(|n| *n += 1);

        let guard = TaskGuard {
            group: Arc::clone(&self.group),
            id,
        };
        tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
    }

    /// Number of tasks that have not yet completed.
    pub fn active(&self) -> usize {
        *self.group.active.borrow()
    }

    /// Names of tasks that have not yet completed.
    pub fn active_names(&self) -> Vec<String> {
        self.group
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Block until the group is empty, including tasks spawned while waiting.
    pub async fn wait(&self) {
        let mut rx = self.group.active.subscribe();
        let _ = rx.wait_for(|active| *active == 0).await;
    }
}

/// Removes a task from its group when dropped.
#[derive(Debug)]
struct TaskGuard {
    group: Arc<Group>,
    id: u64,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let name = self
            .group
            .names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        if std::thread::panicking() {
            tracing::error!(task = ?name, "background task panicked");
        }
        self.group.active.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(task = ?name, "background task finished");
    }
}

/// Run GC against `store` every `interval` until shutdown is triggered.
pub fn spawn_periodic_gc(
    tasks: &BackgroundTasks,
    store: Arc<dyn ImageStore>,
    interval: Duration,
    mut shutdown: ShutdownListener,
) {
    let root = store.root_dir().display().to_string();
    let name = format!("gc:{root}");

    tasks.spawn(name, async move {
        tracing::info!(root = %root, interval = ?interval, "periodic GC starting");
        let mut ticker = time::interval_at(Instant::now() + interval, interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if shutdown.is_triggered() {
                        break;
                    }
                    match store.run_gc().await {
                        Ok(report) => {
                            tracing::debug!(root = %root, removed = report.removed, "GC pass complete");
                            metrics::record_gc_run(&root, report.removed);
                        }
                        Err(e) => tracing::error!(root = %root, error = %e, "GC pass failed"),
                    }
                }
                _ = shutdown.triggered() => {
                    tracing::info!(root = %root, "periodic GC received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    });
}

/// Starts background work for a resolved topology.
#[derive(Clone)]
pub struct TaskCoordinator {
    tasks: BackgroundTasks,
    extensions: Arc<dyn Extensions>,
    shutdown: Arc<Shutdown>,
}

impl TaskCoordinator {
    pub fn new(tasks: BackgroundTasks, extensions: Arc<dyn Extensions>, shutdown: Arc<Shutdown>) -> Self {
        Self {
            tasks,
            extensions,
            shutdown,
        }
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Start GC and extensions for every store in `topology`.
    pub fn start(&self, config: &RegistryConfig, topology: &Arc<StorageTopology>) {
        // 1. Periodic GC, independently per store
        let declarations = std::iter::once((topology.default_store(), &config.storage.store)).chain(
            config
                .storage
                .sub_paths
                .iter()
                .filter_map(|(route, decl)| topology.named_store(route).map(|store| (store, decl))),
        );
        for (store, decl) in declarations {
            if decl.gc && decl.gc_interval_secs > 0 {
                spawn_periodic_gc(
                    &self.tasks,
                    store.clone(),
                    Duration::from_secs(decl.gc_interval_secs),
                    self.shutdown.subscribe(),
                );
            }
        }

        // 2. Extension hooks
        if let Some(ext_config) = &config.extensions {
            for root in topology.roots() {
                self.extensions.enable_search(config, &root);
            }
            self.extensions
                .enable_metrics(config, topology.default_store().root_dir());

            if let Some(search) = ext_config.search.as_ref().filter(|s| s.enable) {
                self.start_vulnerability_db(
                    topology.default_store().root_dir().join(".vulndb"),
                    Duration::from_secs(search.update_interval_secs),
                );
            }

            self.extensions.enable_scrub(config, topology.clone());
        }

        // 3. Sync, across the whole topology
        self.start_sync(config, topology);
    }

    /// Enable sync if `config` declares it. Returns whether it was enabled.
    pub fn start_sync(&self, config: &RegistryConfig, topology: &Arc<StorageTopology>) -> bool {
        if config.extensions.as_ref().and_then(|e| e.active_sync()).is_none() {
            return false;
        }

        self.extensions
            .enable_sync(config, &self.tasks, topology.clone(), self.shutdown.subscribe());
        true
    }

    fn start_vulnerability_db(&self, db_dir: std::path::PathBuf, update_interval: Duration) {
        let extensions = self.extensions.clone();
        self.tasks.spawn("vulnerability-db", async move {
            let result = tokio::task::spawn_blocking(move || {
                extensions.download_vulnerability_db(&db_dir, update_interval)
            })
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "vulnerability database download failed"),
                Err(e) => tracing::error!(error = %e, "vulnerability database task panicked"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn wait_blocks_until_all_complete() {
        let tasks = BackgroundTasks::new();
        let (tx, rx) = oneshot::channel::<()>();
        tasks.spawn("held", async move {
            let _ = rx.await;
        });
        tasks.spawn("quick", async {});

        let blocked = tokio::time::timeout(Duration::from_millis(50), tasks.wait()).await;
        assert!(blocked.is_err());
        assert_eq!(tasks.active_names(), vec!["held".to_string()]);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), tasks.wait()).await.unwrap();
        assert_eq!(tasks.active(), 0);
    }

    #[tokio::test]
    async fn wait_includes_tasks_spawned_while_waiting() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_tasks = tasks.clone();
        let inner_done = done.clone();
        tasks.spawn("parent", async move {
            let d = inner_done.clone();
            inner_tasks.spawn("child", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                d.fetch_add(1, Ordering::SeqCst);
            });
            inner_done.fetch_add(1, Ordering::SeqCst);
        });

        tasks.wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn periodic_gc_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ImageStore> = Arc::new(
            crate::storage::LocalImageStore::new(
                dir.path(),
                crate::storage::StoreOptions {
                    gc: true,
                    gc_delay: Duration::ZERO,
                    dedupe: false,
                    commit: false,
                },
            )
            .unwrap(),
        );
        let tasks = BackgroundTasks::new();
        let shutdown = Shutdown::new();

        spawn_periodic_gc(&tasks, store, Duration::from_secs(60), shutdown.subscribe());
        assert_eq!(tasks.active(), 1);

        shutdown.trigger();
        tasks.wait().await;
        assert_eq!(tasks.active(), 0);
    }
}
