//! Object-store backed image store.
//!
//! The remote driver itself is an external collaborator: it is obtained from a
//! [`DriverFactory`] given the named driver configuration. This module owns the
//! store that sits on top of it: blobs live at
//! `<remote_root>/<repo>/blobs/sha256/<hex>`, uploads stage under the local
//! caching root first. With dedupe on, content is written once to
//! `<remote_root>/_blobs/sha256/<hex>` and each repository keeps a small link
//! object naming the digest.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;

use crate::error::{RegistryError, RegistryResult};
use crate::storage::{
    blob_path, stage_upload, validate_repo_name, BackendKind, Digest, ImageStore, StoreOptions,
};

/// The only remote driver identifier the registry accepts.
pub const S3_DRIVER_NAME: &str = "s3";

/// Remote path used when the driver table has no `rootdirectory`.
pub const DEFAULT_REMOTE_ROOT: &str = "/";

const SHARED_BLOBS: &str = "_blobs";

/// Minimal object-store interface consumed by [`RemoteImageStore`].
#[async_trait]
pub trait ObjectStoreDriver: Send + Sync {
    /// Driver name for logging.
    fn name(&self) -> &str;

    async fn get(&self, path: &str) -> RegistryResult<Option<Bytes>>;

    async fn put(&self, path: &str, data: Bytes) -> RegistryResult<()>;

    async fn exists(&self, path: &str) -> RegistryResult<bool>;

    /// Returns false when nothing was stored at `path`.
    async fn delete(&self, path: &str) -> RegistryResult<bool>;
}

/// Creates remote driver handles from named driver configuration.
pub trait DriverFactory: Send + Sync {
    fn create(&self, name: &str, params: &toml::Table) -> RegistryResult<Arc<dyn ObjectStoreDriver>>;
}

/// Factory for builds that link no remote driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemoteDrivers;

impl DriverFactory for NoRemoteDrivers {
    fn create(&self, name: &str, params: &toml::Table) -> RegistryResult<Arc<dyn ObjectStoreDriver>> {
        let target = params
            .get("bucket")
            .and_then(toml::Value::as_str)
            .unwrap_or(name);
        Err(RegistryError::storage_unavailable(
            target,
            format!("no {name} driver is linked into this build"),
        ))
    }
}

/// Image store writing through a remote driver.
#[derive(Clone)]
pub struct RemoteImageStore {
    remote_root: String,
    cache_root: PathBuf,
    options: StoreOptions,
    driver: Arc<dyn ObjectStoreDriver>,
}

impl fmt::Debug for RemoteImageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteImageStore")
            .field("remote_root", &self.remote_root)
            .field("cache_root", &self.cache_root)
            .field("driver", &self.driver.name())
            .field("options", &self.options)
            .finish()
    }
}

impl RemoteImageStore {
    /// Create a store writing under `remote_root` and caching under `cache_root`.
    pub fn new(
        remote_root: impl Into<String>,
        cache_root: impl Into<PathBuf>,
        options: StoreOptions,
        driver: Arc<dyn ObjectStoreDriver>,
    ) -> RegistryResult<Self> {
        let cache_root = cache_root.into();
        std::fs::create_dir_all(&cache_root)
            .map_err(|e| RegistryError::storage_unavailable(&cache_root, e))?;

        Ok(Self {
            remote_root: remote_root.into(),
            cache_root,
            options,
            driver,
        })
    }

    fn remote_path(&self, relative: &Path) -> String {
        let root = self.remote_root.trim_end_matches('/');
        format!("{}/{}", root, relative.to_string_lossy())
    }

    fn repo_path(&self, repo: &str, digest: &Digest) -> String {
        self.remote_path(&blob_path(repo, digest))
    }

    fn shared_path(&self, digest: &Digest) -> String {
        self.remote_path(&blob_path(SHARED_BLOBS, digest))
    }

    /// Resolve where the bytes for `repo`/`digest` live, if anywhere.
    async fn locate(&self, repo: &str, digest: &Digest) -> RegistryResult<Option<String>> {
        let direct = self.repo_path(repo, digest);
        if !self.options.dedupe {
            return Ok(self.driver.exists(&direct).await?.then_some(direct));
        }

        match self.driver.get(&direct).await? {
            Some(link) if link.as_ref() == digest.to_string().as_bytes() => {
                Ok(Some(self.shared_path(digest)))
            }
            Some(_) => Ok(Some(direct)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ImageStore for RemoteImageStore {
    fn root_dir(&self) -> &Path {
        &self.cache_root
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn remote_root(&self) -> Option<&str> {
        Some(&self.remote_root)
    }

    fn dedupe(&self) -> bool {
        self.options.dedupe
    }

    fn options(&self) -> &StoreOptions {
        &self.options
    }

    async fn put_blob(&self, repo: &str, digest: &Digest, data: Bytes) -> RegistryResult<()> {
        validate_repo_name(repo)?;
        digest.verify(&data)?;

        // keep a local copy until the remote write lands so GC can reclaim it on failure
        let staged = stage_upload(&self.cache_root, &data).await?;

        let result = if self.options.dedupe {
            let shared = self.shared_path(digest);
            if !self.driver.exists(&shared).await? {
                self.driver.put(&shared, data).await?;
            }
            let link = Bytes::from(digest.to_string());
            self.driver.put(&self.repo_path(repo, digest), link).await
        } else {
            self.driver.put(&self.repo_path(repo, digest), data).await
        };

        if result.is_ok() {
            let _ = tokio::fs::remove_file(&staged).await;
        }
        result
    }

    async fn get_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<Option<Bytes>> {
        validate_repo_name(repo)?;
        match self.locate(repo, digest).await? {
            Some(path) => self.driver.get(&path).await,
            None => Ok(None),
        }
    }

    async fn has_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<bool> {
        validate_repo_name(repo)?;
        Ok(self.locate(repo, digest).await?.is_some())
    }

    async fn delete_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<bool> {
        validate_repo_name(repo)?;
        // shared content stays; other repositories may still link to it
        self.driver.delete(&self.repo_path(repo, digest)).await
    }
}
