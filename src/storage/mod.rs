//! Storage subsystem.
//!
//! # Data Flow
//! ```text
//! StorageConfig (default + sub_paths)
//!     → topology.rs (per-store driver choice, dedupe probe)
//!         → hardlink.rs (can this root link files?)
//!         → local.rs  (filesystem store)
//!         → remote.rs (object-store driver + local caching root)
//!     → StorageTopology (immutable, shared via Arc)
//!
//! Request for repository "team/app":
//!     → StorageTopology::store_for("team/app")
//!     → named store "team" if declared, else default store
//! ```
//!
//! # Design Decisions
//! - Stores are built sequentially and frozen before any background task starts
//! - Driver choice and root never change after construction
//! - Uploads stage under `<root>/.uploads` so GC can reclaim abandoned writes

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use axum::body::Bytes;

use crate::error::{RegistryError, RegistryResult};

pub mod digest;
pub mod hardlink;
pub mod local;
pub mod remote;
pub mod topology;

pub use digest::Digest;
pub use hardlink::{FsHardlinkProbe, HardlinkProbe};
pub use local::LocalImageStore;
pub use remote::{DriverFactory, ObjectStoreDriver, RemoteImageStore, S3_DRIVER_NAME};
pub use topology::{StorageTopology, TopologyResolver};

/// Directory (under a store root) holding in-progress uploads.
pub const UPLOADS_DIR: &str = ".uploads";

/// Which driver backs a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Remote => "remote",
        }
    }
}

/// Settings shared by both store variants.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    pub gc: bool,
    pub gc_delay: Duration,
    pub dedupe: bool,
    pub commit: bool,
}

/// Outcome of one GC pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    /// Abandoned uploads removed.
    pub removed: usize,
}

/// A content store rooted at one location.
#[async_trait]
pub trait ImageStore: Send + Sync + std::fmt::Debug {
    /// Local root (the caching root for remote stores).
    fn root_dir(&self) -> &Path;

    fn kind(&self) -> BackendKind;

    /// Root path on the remote side; `None` for local stores.
    fn remote_root(&self) -> Option<&str> {
        None
    }

    /// Whether identical blobs are deduplicated.
    fn dedupe(&self) -> bool;

    fn options(&self) -> &StoreOptions;

    /// Store `data` under `repo` after checking it hashes to `digest`.
    async fn put_blob(&self, repo: &str, digest: &Digest, data: Bytes) -> RegistryResult<()>;

    async fn get_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<Option<Bytes>>;

    async fn has_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<bool>;

    /// Returns false when the blob was not present.
    async fn delete_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<bool>;

    /// Remove abandoned uploads older than the configured GC delay.
    async fn run_gc(&self) -> RegistryResult<GcReport> {
        if !self.options().gc {
            return Ok(GcReport::default());
        }
        collect_stale_uploads(self.root_dir(), self.options().gc_delay).await
    }
}

/// Reject repository names that could escape the store root.
pub fn validate_repo_name(repo: &str) -> RegistryResult<()> {
    let bad = repo.is_empty()
        || repo.starts_with('/')
        || repo
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == ".." || part.starts_with('.'));

    if bad {
        return Err(RegistryError::Config(format!("invalid repository name {repo:?}")));
    }
    Ok(())
}

/// Relative path of a blob inside a repository.
pub fn blob_path(repo: &str, digest: &Digest) -> PathBuf {
    Path::new(repo)
        .join("blobs")
        .join(digest.algorithm())
        .join(digest.hex())
}

/// Write `data` into a fresh staging file under `root` and return its path.
pub(crate) async fn stage_upload(root: &Path, data: &[u8]) -> RegistryResult<PathBuf> {
    let dir = root.join(UPLOADS_DIR);
    tokio::fs::create_dir_all(&dir).await?;

    let path = dir.join(uuid::Uuid::new_v4().to_string());
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

/// Delete staging files whose last modification is older than `delay`.
pub(crate) async fn collect_stale_uploads(root: &Path, delay: Duration) -> RegistryResult<GcReport> {
    let dir = root.join(UPLOADS_DIR);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(GcReport::default()),
        Err(e) => return Err(e.into()),
    };

    let now = SystemTime::now();
    let mut report = GcReport::default();

    while let Some(entry) = entries.next_entry().await? {
        let modified = entry.metadata().await?.modified()?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age >= delay {
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(report)
}
