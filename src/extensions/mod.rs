//! Optional feature extensions (capability registry).
//!
//! # Responsibilities
//! - Define the hooks the core calls for metrics, search, sync and scrub
//! - Provide a disabled behaviour for every hook (log a warning, do nothing)
//! - Let fuller builds inject real implementations once, at process assembly
//!
//! # Design Decisions
//! - Hooks are trait methods with provided "disabled" bodies; an
//!   implementation overrides only what it actually ships
//! - The implementation is chosen once by whoever builds the controller and
//!   is shared as `Arc<dyn Extensions>`; the core never looks it up again

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use crate::config::RegistryConfig;
use crate::error::RegistryResult;
use crate::lifecycle::shutdown::ShutdownListener;
use crate::lifecycle::tasks::BackgroundTasks;
use crate::storage::StorageTopology;

#[cfg(feature = "metrics")]
pub mod prometheus;

#[cfg(feature = "metrics")]
pub use prometheus::PrometheusExtensions;

/// Hooks for optional registry features.
pub trait Extensions: Send + Sync {
    /// Enable metrics collection. Called once, with the default store root.
    fn enable_metrics(&self, _config: &RegistryConfig, _root: &Path) {
        tracing::warn!(
            "skipping enabling metrics extension because this binary doesn't support it, \
             please build a binary that includes this feature"
        );
    }

    /// Enable search for one store root. Called once per store.
    fn enable_search(&self, _config: &RegistryConfig, _root: &Path) {
        tracing::warn!(
            "skipping enabling search extension because this binary doesn't support it, \
             please build a binary that includes this feature"
        );
    }

    /// Start syncing from upstream registries across the whole topology.
    ///
    /// Long-running work must be spawned on `tasks` so shutdown waits for it,
    /// and should poll `shutdown` to stop early.
    fn enable_sync(
        &self,
        _config: &RegistryConfig,
        _tasks: &BackgroundTasks,
        _topology: Arc<StorageTopology>,
        _shutdown: ShutdownListener,
    ) {
        tracing::warn!(
            "skipping enabling sync extension because this binary doesn't support it, \
             please build a binary that includes this feature"
        );
    }

    /// Start periodic scrubbing of every store.
    fn enable_scrub(&self, _config: &RegistryConfig, _topology: Arc<StorageTopology>) {
        tracing::warn!(
            "skipping enabling scrub extension because this binary doesn't support it, \
             please build a binary that includes this feature"
        );
    }

    /// Mount metrics routes onto `router`.
    fn setup_metrics_routes(
        &self,
        _config: &RegistryConfig,
        router: Router,
        _topology: &Arc<StorageTopology>,
    ) -> Router {
        tracing::warn!(
            "skipping setting up metrics routes because this binary doesn't support \
             the metrics extension, please build a binary that includes this feature"
        );
        router
    }

    /// Mount search routes onto `router`.
    fn setup_search_routes(
        &self,
        _config: &RegistryConfig,
        router: Router,
        _topology: &Arc<StorageTopology>,
    ) -> Router {
        tracing::warn!(
            "skipping setting up search routes because this binary doesn't support \
             the search extension, please build a binary that includes this feature"
        );
        router
    }

    /// Pull one image from an upstream registry on demand.
    fn sync_one_image(
        &self,
        _config: &RegistryConfig,
        _topology: &Arc<StorageTopology>,
        _repo: &str,
        _reference: &str,
        _is_artifact: bool,
    ) -> RegistryResult<()> {
        tracing::warn!(
            "skipping syncing on demand because this binary doesn't support the sync extension, \
             please build a binary that includes this feature"
        );
        Ok(())
    }

    /// Fetch or refresh the vulnerability database used by search.
    fn download_vulnerability_db(&self, _db_dir: &Path, _update_interval: Duration) -> RegistryResult<()> {
        Ok(())
    }
}

/// Build with no extensions: every hook logs and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledExtensions;

impl Extensions for DisabledExtensions {}

/// The extension set linked into this build.
pub fn linked_extensions() -> Arc<dyn Extensions> {
    #[cfg(feature = "metrics")]
    {
        Arc::new(PrometheusExtensions::default())
    }
    #[cfg(not(feature = "metrics"))]
    {
        Arc::new(DisabledExtensions)
    }
}
