//! Registry lifecycle controller.
//!
//! # Responsibilities
//! - Assemble the server: security policy, storage topology, background
//!   tasks, router, listener
//! - Apply hot reloads to the live subset of configuration
//! - Shut down gracefully: background work first, then the listener
//!
//! # Design Decisions
//! - Outer state is `Unstarted → Starting → Running → ShuttingDown → Stopped`;
//!   reload never changes it
//! - `run` claims `Starting` atomically, so only one caller ever assembles
//! - Every dependency is owned by the controller and handed out explicitly;
//!   nothing is global
//! - Shutdown waits for the task group before draining the listener, so
//!   in-flight background work can still serve requests through it
//!
//! # Data Flow
//! ```text
//! run():
//!     config → resolve_security_policy → rustls config (optional)
//!     config → TopologyResolver        → StorageTopology
//!     topology + config → TaskCoordinator (GC, extensions, sync)
//!     topology + LiveConfig → router → bind → serve
//!
//! load_new_config():
//!     new config → LiveConfig (atomic swap) → start sync if newly declared
//!
//! shutdown():
//!     trigger intent → wait for task group → drain listener → Stopped
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use axum_server::Handle;
use tokio::sync::watch;

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::extensions::Extensions;
use crate::http::{build_router, serve, AppState};
use crate::lifecycle::live::{LiveConfig, SharedLiveConfig};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::tasks::{BackgroundTasks, TaskCoordinator};
use crate::net::{listener, tls};
use crate::observability::dump_runtime_params;
use crate::security::policy::resolve_security_policy;
use crate::storage::{StorageTopology, TopologyResolver};

/// Outer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Unstarted,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Unstarted => "unstarted",
            ControllerState::Starting => "starting",
            ControllerState::Running => "running",
            ControllerState::ShuttingDown => "shutting down",
            ControllerState::Stopped => "stopped",
        }
    }
}

/// Owns the running registry.
pub struct Controller {
    config: Arc<RegistryConfig>,
    live: SharedLiveConfig,
    extensions: Arc<dyn Extensions>,
    resolver: TopologyResolver,
    coordinator: TaskCoordinator,
    shutdown: Arc<Shutdown>,
    state: watch::Sender<ControllerState>,
    topology: OnceLock<Arc<StorageTopology>>,
    handle: Handle,
    reload_lock: Mutex<()>,
}

impl Controller {
    pub fn new(config: RegistryConfig, extensions: Arc<dyn Extensions>) -> Self {
        let shutdown = Arc::new(Shutdown::new());
        let coordinator = TaskCoordinator::new(BackgroundTasks::new(), extensions.clone(), shutdown.clone());
        let (state, _) = watch::channel(ControllerState::Unstarted);

        Self {
            live: LiveConfig::shared(&config),
            config: Arc::new(config),
            extensions,
            resolver: TopologyResolver::default(),
            coordinator,
            shutdown,
            state,
            topology: OnceLock::new(),
            handle: Handle::new(),
            reload_lock: Mutex::new(()),
        }
    }

    /// Replace the topology resolver (remote drivers, hard-link probe).
    pub fn with_resolver(mut self, resolver: TopologyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Current live settings.
    pub fn live(&self) -> Arc<LiveConfig> {
        self.live.load_full()
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        self.coordinator.tasks()
    }

    /// The resolved topology, once `run` has built it.
    pub fn topology(&self) -> Option<Arc<StorageTopology>> {
        self.topology.get().cloned()
    }

    /// Resolves with the bound address once the server accepts connections,
    /// or `None` if `run` failed before binding.
    pub async fn listening(&self) -> Option<SocketAddr> {
        let mut state = self.state.subscribe();
        let reached = state
            .wait_for(|s| !matches!(s, ControllerState::Unstarted | ControllerState::Starting))
            .await
            .ok()
            .map(|s| *s);
        match reached {
            Some(ControllerState::Running) => self.handle.listening().await,
            _ => None,
        }
    }

    fn transition(&self, from: ControllerState, to: ControllerState) -> RegistryResult<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                result = Err(RegistryError::InvalidState {
                    expected: from.as_str(),
                    found: state.as_str(),
                });
                false
            }
        });
        if result.is_ok() {
            tracing::debug!(from = from.as_str(), to = to.as_str(), "controller state changed");
        }
        result
    }

    /// Assemble and serve until shut down.
    ///
    /// Only the first call proceeds; any other returns `InvalidState`
    /// without touching the running instance.
    pub async fn run(&self) -> RegistryResult<()> {
        self.transition(ControllerState::Unstarted, ControllerState::Starting)?;

        let result = self.assemble_and_serve().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "registry failed");
            self.shutdown.trigger();
        }
        self.state.send_replace(ControllerState::Stopped);
        result
    }

    async fn assemble_and_serve(&self) -> RegistryResult<()> {
        let config = &self.config;
        tracing::info!(params = ?config.sanitized(), "configuration settings");
        dump_runtime_params();

        let tls_config = match resolve_security_policy(&config.http)? {
            Some(policy) => Some(tls::rustls_config(&policy)?),
            None => None,
        };

        let topology = Arc::new(self.resolver.resolve(&config.storage)?);
        let topology = self.topology.get_or_init(|| topology).clone();

        self.coordinator.start(config, &topology);

        let router = build_router(
            config,
            AppState {
                config: config.clone(),
                live: self.live.clone(),
                topology,
                extensions: self.extensions.clone(),
            },
        );

        let listener = listener::bind(&config.http.address, config.http.port)?;
        self.transition(ControllerState::Starting, ControllerState::Running)?;

        serve(router, listener, tls_config, self.handle.clone()).await
    }

    /// Apply the reloadable parts of `new_config`: access control and sync.
    pub fn load_new_config(&self, new_config: &RegistryConfig) -> RegistryResult<()> {
        if self.state() != ControllerState::Running {
            return Err(RegistryError::InvalidState {
                expected: ControllerState::Running.as_str(),
                found: self.state().as_str(),
            });
        }

        let _guard = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.live.load_full();
        let next = LiveConfig::from_config(new_config);

        let sync_added = next.sync_enabled() && !previous.sync_enabled();
        let sync_removed = previous.sync_enabled() && !next.sync_enabled();

        self.live.store(Arc::new(next.clone()));
        tracing::info!(params = ?new_config.sanitized(), "loaded new configuration settings");

        if sync_added {
            if let Some(topology) = self.topology.get() {
                self.coordinator.start_sync(&next.overlay(&self.config), topology);
            }
        }
        if sync_removed {
            tracing::info!("sync disabled, running sync tasks are left to finish");
        }

        Ok(())
    }

    /// Stop background work, then drain and close the listener.
    pub async fn shutdown(&self) {
        let mut state = self.state.subscribe();
        loop {
            match self.state() {
                ControllerState::Unstarted => {
                    if self
                        .transition(ControllerState::Unstarted, ControllerState::Stopped)
                        .is_ok()
                    {
                        return;
                    }
                }
                ControllerState::Starting => {
                    let _ = state.wait_for(|s| *s != ControllerState::Starting).await;
                }
                ControllerState::ShuttingDown | ControllerState::Stopped => {
                    let _ = state.wait_for(|s| *s == ControllerState::Stopped).await;
                    return;
                }
                ControllerState::Running => {
                    if self
                        .transition(ControllerState::Running, ControllerState::ShuttingDown)
                        .is_ok()
                    {
                        break;
                    }
                }
            }
        }

        self.shutdown.trigger();
        let pending = self.tasks().active_names();
        if !pending.is_empty() {
            tracing::info!(tasks = ?pending, "waiting for background tasks");
        }
        self.tasks().wait().await;

        let grace = Duration::from_secs(self.config.http.shutdown_grace_secs);
        tracing::info!(grace = ?grace, "closing listener");
        self.handle.graceful_shutdown(Some(grace));

        let _ = state.wait_for(|s| *s == ControllerState::Stopped).await;
        tracing::info!("registry stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::DisabledExtensions;

    fn config(root: &std::path::Path) -> RegistryConfig {
        let mut config = RegistryConfig::default();
        config.http.port = 0;
        config.storage.store.root_directory = Some(root.to_path_buf());
        config
    }

    #[tokio::test]
    async fn reload_requires_running() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Controller::new(config(dir.path()), Arc::new(DisabledExtensions));

        let err = controller.load_new_config(&config(dir.path())).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn missing_storage_fails_run() {
        let mut cfg = RegistryConfig::default();
        cfg.http.port = 0;
        let controller = Controller::new(cfg, Arc::new(DisabledExtensions));

        let err = controller.run().await.unwrap_err();
        assert!(matches!(err, RegistryError::NoStorageConfigured));
        assert_eq!(controller.state(), ControllerState::Stopped);
        assert!(controller.listening().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_before_run_stops() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Controller::new(config(dir.path()), Arc::new(DisabledExtensions));
        controller.shutdown().await;
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_first_serves() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(Controller::new(config(dir.path()), Arc::new(DisabledExtensions)));

        let first = controller.clone();
        let second = controller.clone();
        let a = tokio::spawn(async move { first.run().await });
        let b = tokio::spawn(async move { second.run().await });

        assert!(controller.listening().await.is_some());
        // the rejected call returns promptly and leaves the server running
        while !(a.is_finished() || b.is_finished()) {
            tokio::task::yield_now().await;
        }
        assert_eq!(controller.state(), ControllerState::Running);

        controller.shutdown().await;
        let results = [a.await.unwrap(), b.await.unwrap()];
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(RegistryError::InvalidState { expected: "unstarted", .. })))
            .count();
        assert_eq!(rejected, 1);
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[tokio::test]
    async fn run_then_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(Controller::new(config(dir.path()), Arc::new(DisabledExtensions)));

        let running = controller.clone();
        let server = tokio::spawn(async move { running.run().await });

        let addr = controller.listening().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(controller.state(), ControllerState::Running);
        assert!(controller.topology().is_some());

        controller.shutdown().await;
        assert_eq!(controller.state(), ControllerState::Stopped);
        server.await.unwrap().unwrap();
    }
}
