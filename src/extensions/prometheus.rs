//! Prometheus-backed metrics extension.
//!
//! Overrides the metrics hooks only; every other hook keeps the disabled
//! behaviour.

use std::path::Path;
use std::sync::{Arc, OnceLock};

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::RegistryConfig;
use crate::extensions::Extensions;
use crate::observability::metrics;
use crate::storage::StorageTopology;

/// Extension set with a Prometheus exporter.
#[derive(Default)]
pub struct PrometheusExtensions {
    handle: OnceLock<PrometheusHandle>,
}

impl PrometheusExtensions {
    /// Handle used to render the exposition text, once metrics are enabled.
    pub fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.get()
    }
}

fn metrics_path(config: &RegistryConfig) -> Option<String> {
    config
        .extensions
        .as_ref()
        .and_then(|ext| ext.metrics.as_ref())
        .filter(|m| m.enable)
        .map(|m| m.path.clone())
}

impl Extensions for PrometheusExtensions {
    fn enable_metrics(&self, config: &RegistryConfig, root: &Path) {
        if metrics_path(config).is_none() {
            tracing::debug!("metrics extension not enabled in configuration");
            return;
        }
        if self.handle.get().is_some() {
            return;
        }

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        if ::metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("a metrics recorder is already installed, exporting from a detached one");
        }
        let _ = self.handle.set(handle);

        metrics::describe();
        tracing::info!(root = %root.display(), "metrics extension enabled");
    }

    fn setup_metrics_routes(
        &self,
        config: &RegistryConfig,
        router: Router,
        _topology: &Arc<StorageTopology>,
    ) -> Router {
        let (Some(path), Some(handle)) = (metrics_path(config), self.handle.get().cloned()) else {
            return router;
        };

        tracing::info!(path = %path, "mounting metrics route");
        router.route(&path, get(move || std::future::ready(handle.render())))
    }
}
