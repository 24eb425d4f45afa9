//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::task::JoinHandle;

use content_registry::config::schema::{
    ExtensionsConfig, MetricsConfig, ScrubConfig, SearchConfig, StoreConfig, SyncConfig, SyncRegistry,
};
use content_registry::extensions::Extensions;
use content_registry::lifecycle::{BackgroundTasks, ShutdownListener};
use content_registry::storage::{DriverFactory, HardlinkProbe, ObjectStoreDriver, StorageTopology};
use content_registry::{Controller, RegistryConfig, RegistryError, RegistryResult};

/// In-memory object store.
#[derive(Default)]
pub struct MemoryDriver {
    objects: Mutex<HashMap<String, Bytes>>,
}

#[async_trait]
impl ObjectStoreDriver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, path: &str) -> RegistryResult<Option<Bytes>> {
        Ok(self.objects.lock().unwrap().get(path).cloned())
    }

    async fn put(&self, path: &str, data: Bytes) -> RegistryResult<()> {
        self.objects.lock().unwrap().insert(path.to_string(), data);
        Ok(())
    }

    async fn exists(&self, path: &str) -> RegistryResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(path))
    }

    async fn delete(&self, path: &str) -> RegistryResult<bool> {
        Ok(self.objects.lock().unwrap().remove(path).is_some())
    }
}

impl MemoryDriver {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Driver factory handing out in-memory drivers and counting calls.
#[derive(Default)]
pub struct FakeDrivers {
    pub created: AtomicUsize,
    pub fail: bool,
    pub drivers: Mutex<Vec<Arc<MemoryDriver>>>,
}

impl FakeDrivers {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Every driver handed out so far, in creation order.
    pub fn handed_out(&self) -> Vec<Arc<MemoryDriver>> {
        self.drivers.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl DriverFactory for FakeDrivers {
    fn create(&self, name: &str, _params: &toml::Table) -> RegistryResult<Arc<dyn ObjectStoreDriver>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RegistryError::storage_unavailable(name, "bucket unreachable"));
        }
        let driver = Arc::new(MemoryDriver::default());
        self.drivers.lock().unwrap().push(driver.clone());
        Ok(driver)
    }
}

/// Probe for a filesystem without hard-link support.
#[derive(Default)]
pub struct NoLinks {
    pub probed: Mutex<Vec<PathBuf>>,
}

impl HardlinkProbe for NoLinks {
    fn validate(&self, root: &Path) -> Result<(), RegistryError> {
        self.probed.lock().unwrap().push(root.to_path_buf());
        Err(RegistryError::CapabilityDegraded {
            root: root.to_path_buf(),
            reason: "link(2) not supported".into(),
        })
    }
}

/// Extension set that counts hook calls. Sync tasks run until shutdown.
#[derive(Default)]
pub struct CountingExtensions {
    pub metrics: AtomicUsize,
    pub search: AtomicUsize,
    pub sync: AtomicUsize,
    pub scrub: AtomicUsize,
    pub vulndb: AtomicUsize,
}

impl CountingExtensions {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl Extensions for CountingExtensions {
    fn enable_metrics(&self, _config: &RegistryConfig, _root: &Path) {
        self.metrics.fetch_add(1, Ordering::SeqCst);
    }

    fn enable_search(&self, _config: &RegistryConfig, _root: &Path) {
        self.search.fetch_add(1, Ordering::SeqCst);
    }

    fn enable_sync(
        &self,
        _config: &RegistryConfig,
        tasks: &BackgroundTasks,
        _topology: Arc<StorageTopology>,
        mut shutdown: ShutdownListener,
    ) {
        self.sync.fetch_add(1, Ordering::SeqCst);
        tasks.spawn("sync", async move {
            shutdown.triggered().await;
        });
    }

    fn enable_scrub(&self, _config: &RegistryConfig, _topology: Arc<StorageTopology>) {
        self.scrub.fetch_add(1, Ordering::SeqCst);
    }

    fn download_vulnerability_db(&self, _db_dir: &Path, _update_interval: Duration) -> RegistryResult<()> {
        self.vulndb.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A local-store config on an ephemeral port with a short drain.
pub fn registry_config(root: &Path) -> RegistryConfig {
    let mut config = RegistryConfig::default();
    config.http.port = 0;
    config.http.shutdown_grace_secs = 1;
    config.storage.store.root_directory = Some(root.to_path_buf());
    config
}

pub fn local_store(root: &Path) -> StoreConfig {
    StoreConfig {
        root_directory: Some(root.to_path_buf()),
        ..Default::default()
    }
}

pub fn driver_table(name: &str) -> toml::Table {
    let mut table = toml::Table::new();
    table.insert("name".into(), toml::Value::String(name.into()));
    table.insert("bucket".into(), toml::Value::String("registry".into()));
    table
}

pub fn sync_config() -> SyncConfig {
    SyncConfig {
        enable: true,
        registries: vec![SyncRegistry {
            urls: vec!["https://upstream.example".into()],
            on_demand: false,
            poll_interval_secs: 3600,
        }],
    }
}

pub fn all_extensions() -> ExtensionsConfig {
    ExtensionsConfig {
        metrics: Some(MetricsConfig::default()),
        search: Some(SearchConfig::default()),
        sync: None,
        scrub: Some(ScrubConfig::default()),
    }
}

/// Spawn `run` and wait until the server accepts connections.
pub async fn start(controller: Arc<Controller>) -> (SocketAddr, JoinHandle<RegistryResult<()>>) {
    let running = controller.clone();
    let server = tokio::spawn(async move { running.run().await });
    let addr = tokio::time::timeout(Duration::from_secs(5), controller.listening())
        .await
        .expect("server did not start in time")
        .expect("server failed to start");
    (addr, server)
}

/// HTTP client that does not keep idle connections around.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
