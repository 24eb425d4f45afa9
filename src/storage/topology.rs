//! Storage topology resolution.
//!
//! # Responsibilities
//! - Build the default store and one store per declared sub-path
//! - Pick the local or remote driver per store
//! - Probe hard-link support before honouring dedupe on local roots
//! - Select the store serving a repository name
//!
//! # Design Decisions
//! - Driver names and route keys are checked for every store before any
//!   store is built
//! - A failed hard-link probe disables dedupe for that store only
//! - The resolved topology is immutable; reload never rebuilds it

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::{StorageConfig, StoreConfig};
use crate::error::{RegistryError, RegistryResult};
use crate::storage::remote::{NoRemoteDrivers, DEFAULT_REMOTE_ROOT};
use crate::storage::{
    DriverFactory, FsHardlinkProbe, HardlinkProbe, ImageStore, LocalImageStore, RemoteImageStore,
    StoreOptions, S3_DRIVER_NAME,
};

/// The resolved set of stores for a running registry.
#[derive(Debug, Clone)]
pub struct StorageTopology {
    default_store: Arc<dyn ImageStore>,
    named_stores: BTreeMap<String, Arc<dyn ImageStore>>,
}

impl StorageTopology {
    pub fn new(
        default_store: Arc<dyn ImageStore>,
        named_stores: BTreeMap<String, Arc<dyn ImageStore>>,
    ) -> Self {
        Self {
            default_store,
            named_stores,
        }
    }

    pub fn default_store(&self) -> &Arc<dyn ImageStore> {
        &self.default_store
    }

    /// Route name -> store, for every declared sub-path.
    pub fn named_stores(&self) -> &BTreeMap<String, Arc<dyn ImageStore>> {
        &self.named_stores
    }

    pub fn named_store(&self, route: &str) -> Option<&Arc<dyn ImageStore>> {
        self.named_stores.get(normalize_route(route))
    }

    /// Store serving `repo`: the sub-path store whose route is the longest
    /// whole-component prefix of the name, otherwise the default store.
    pub fn store_for(&self, repo: &str) -> &Arc<dyn ImageStore> {
        let mut candidate = repo.trim_matches('/');
        loop {
            if let Some(store) = self.named_stores.get(candidate) {
                return store;
            }
            match candidate.rsplit_once('/') {
                Some((parent, _)) => candidate = parent,
                None => return &self.default_store,
            }
        }
    }

    /// Every store, default first.
    pub fn stores(&self) -> impl Iterator<Item = (Option<&str>, &Arc<dyn ImageStore>)> {
        std::iter::once((None, &self.default_store)).chain(
            self.named_stores
                .iter()
                .map(|(route, store)| (Some(route.as_str()), store)),
        )
    }

    /// Local roots of every store, default first.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.stores().map(|(_, store)| store.root_dir().to_path_buf()).collect()
    }
}

/// Builds a [`StorageTopology`] from a storage declaration.
#[derive(Clone)]
pub struct TopologyResolver {
    drivers: Arc<dyn DriverFactory>,
    probe: Arc<dyn HardlinkProbe>,
}

impl Default for TopologyResolver {
    fn default() -> Self {
        Self::new(Arc::new(NoRemoteDrivers), Arc::new(FsHardlinkProbe))
    }
}

impl TopologyResolver {
    pub fn new(drivers: Arc<dyn DriverFactory>, probe: Arc<dyn HardlinkProbe>) -> Self {
        Self { drivers, probe }
    }

    /// Resolve the default store and every sub-path store.
    pub fn resolve(&self, config: &StorageConfig) -> RegistryResult<StorageTopology> {
        let Some(default_root) = root_of(&config.store) else {
            tracing::error!("no storage root directory configured, cannot build the default store");
            return Err(RegistryError::NoStorageConfigured);
        };

        check_driver(None, &config.store)?;
        let mut seen = BTreeSet::new();
        for (declared, store) in &config.sub_paths {
            let route = normalize_route(declared);
            if route.is_empty() || !seen.insert(route) {
                tracing::error!(route = %declared, "sub-path route is empty or declared twice");
                return Err(RegistryError::Config(format!(
                    "sub-path route {declared:?} is empty or declared twice"
                )));
            }
            check_driver(Some(route), store)?;
        }

        let default_store = self.resolve_store(None, default_root, &config.store)?;

        let mut named_stores = BTreeMap::new();
        for (declared, store) in &config.sub_paths {
            let route = normalize_route(declared);
            let root = root_of(store).ok_or_else(|| {
                tracing::error!(route = %route, "sub-path has no root directory");
                RegistryError::Config(format!("sub-path {route} has no root directory"))
            })?;
            let resolved = self.resolve_store(Some(route), root, store)?;
            named_stores.insert(route.to_string(), resolved);
        }

        tracing::info!(
            default_root = %default_root.display(),
            sub_paths = named_stores.len(),
            "storage topology resolved"
        );

        Ok(StorageTopology::new(default_store, named_stores))
    }

    fn resolve_store(
        &self,
        route: Option<&str>,
        root: &Path,
        config: &StoreConfig,
    ) -> RegistryResult<Arc<dyn ImageStore>> {
        let route_label = route.unwrap_or("default");
        let mut dedupe = config.dedupe;

        // 1. Hard-link probe, local stores only
        if dedupe && config.storage_driver.is_none() {
            match self.probe.validate(root) {
                Ok(()) => {}
                Err(e) if e.is_degradation() => {
                    tracing::warn!(
                        route = route_label,
                        root = %root.display(),
                        error = %e,
                        "storage root filesystem does not support hard links, disabling dedupe"
                    );
                    dedupe = false;
                }
                Err(e) => return Err(e),
            }
        }

        let options = StoreOptions {
            gc: config.gc,
            gc_delay: Duration::from_secs(config.gc_delay_secs),
            dedupe,
            commit: config.commit,
        };

        // 2. Local store
        let Some(params) = &config.storage_driver else {
            let store = LocalImageStore::new(root, options).inspect_err(|e| {
                tracing::error!(route = route_label, root = %root.display(), error = %e, "unable to create local store");
            })?;
            log_resolved(route_label, &store);
            return Ok(Arc::new(store));
        };

        // 3. Remote store; the driver name was checked up front
        let driver = self.drivers.create(S3_DRIVER_NAME, params).inspect_err(|e| {
            tracing::error!(route = route_label, root = %root.display(), error = %e, "unable to create remote storage driver");
        })?;

        let remote_root = params
            .get("rootdirectory")
            .map(|value| match value {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| DEFAULT_REMOTE_ROOT.to_string());

        let store = RemoteImageStore::new(remote_root, root, options, driver).inspect_err(|e| {
            tracing::error!(route = route_label, root = %root.display(), error = %e, "unable to create remote store");
        })?;
        log_resolved(route_label, &store);
        Ok(Arc::new(store))
    }
}

fn log_resolved(route: &str, store: &dyn ImageStore) {
    tracing::debug!(
        route,
        kind = store.kind().as_str(),
        root = %store.root_dir().display(),
        remote_root = store.remote_root().unwrap_or("-"),
        dedupe = store.dedupe(),
        "store resolved"
    );
}

/// Route key with surrounding slashes removed: `/team/` and `team` are one route.
pub fn normalize_route(route: &str) -> &str {
    route.trim_matches('/')
}

fn root_of(config: &StoreConfig) -> Option<&Path> {
    config
        .root_directory
        .as_deref()
        .filter(|root| !root.as_os_str().is_empty())
}

fn check_driver(route: Option<&str>, config: &StoreConfig) -> RegistryResult<()> {
    match config.driver_name() {
        Some(name) if name != S3_DRIVER_NAME => {
            tracing::error!(route = route.unwrap_or("default"), driver = %name, "unsupported storage driver");
            Err(RegistryError::UnsupportedDriver(name))
        }
        _ => Ok(()),
    }
}
