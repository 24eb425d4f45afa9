//! The hot-reloadable subset of configuration.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::{AccessControlConfig, ExtensionsConfig, RegistryConfig, SyncConfig};

/// Settings that may change without restarting the listener.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveConfig {
    pub access_control: Option<AccessControlConfig>,
    pub sync: Option<SyncConfig>,
}

/// Single writer (the controller), lock-free readers (request handlers).
pub type SharedLiveConfig = Arc<ArcSwap<LiveConfig>>;

impl LiveConfig {
    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            access_control: config.http.access_control.clone(),
            sync: config.extensions.as_ref().and_then(|e| e.sync.clone()),
        }
    }

    pub fn shared(config: &RegistryConfig) -> SharedLiveConfig {
        Arc::new(ArcSwap::from_pointee(Self::from_config(config)))
    }

    pub fn sync_enabled(&self) -> bool {
        self.sync.as_ref().is_some_and(|s| s.enable)
    }

    /// Whether any upstream is configured for on-demand pulls.
    pub fn on_demand_sync(&self) -> bool {
        self.sync
            .as_ref()
            .filter(|s| s.enable)
            .is_some_and(|s| s.registries.iter().any(|r| r.on_demand))
    }

    /// A copy of `base` with these live settings applied.
    pub fn overlay(&self, base: &RegistryConfig) -> RegistryConfig {
        let mut config = base.clone();
        config.http.access_control = self.access_control.clone();
        if let Some(ext) = config.extensions.as_mut() {
            ext.sync = self.sync.clone();
        } else if let Some(sync) = &self.sync {
            config.extensions = Some(ExtensionsConfig {
                sync: Some(sync.clone()),
                ..Default::default()
            });
        }
        config
    }
}
