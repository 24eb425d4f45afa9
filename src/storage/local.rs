//! Filesystem-backed image store.
//!
//! Layout:
//! ```text
//! {root}/
//! ├── .uploads/
//! │   └── <uuid>            # staged write, renamed into place on success
//! └── <repo>/
//!     └── blobs/sha256/<hex>
//! ```
//!
//! With dedupe on, a blob already present under another repository is
//! hard-linked instead of written again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use dashmap::DashMap;

use crate::error::RegistryResult;
use crate::storage::{
    blob_path, stage_upload, validate_repo_name, BackendKind, Digest, ImageStore, StoreOptions,
};

/// Local filesystem store.
#[derive(Debug, Clone)]
pub struct LocalImageStore {
    root: PathBuf,
    options: StoreOptions,
    /// Digest -> a path already holding that content.
    known_blobs: Arc<DashMap<Digest, PathBuf>>,
}

impl LocalImageStore {
    /// Create a store rooted at `root`. The directory is created if missing.
    pub fn new(root: impl Into<PathBuf>, options: StoreOptions) -> RegistryResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| crate::error::RegistryError::storage_unavailable(&root, e))?;

        Ok(Self {
            root,
            options,
            known_blobs: Arc::new(DashMap::new()),
        })
    }

    fn full_path(&self, repo: &str, digest: &Digest) -> PathBuf {
        self.root.join(blob_path(repo, digest))
    }

    /// Try to satisfy a write by linking an existing copy of the same content.
    async fn link_existing(&self, digest: &Digest, dest: &Path) -> bool {
        let Some(source) = self.known_blobs.get(digest).map(|entry| entry.value().clone()) else {
            return false;
        };
        if source == dest {
            return tokio::fs::metadata(dest).await.is_ok();
        }

        match tokio::fs::hard_link(&source, dest).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => true,
            Err(e) => {
                tracing::debug!(source = ?source, error = %e, "dedupe link failed, writing a copy");
                self.known_blobs.remove(digest);
                false
            }
        }
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    fn root_dir(&self) -> &Path {
        &self.root
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
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

        let dest = self.full_path(repo, digest);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if self.options.dedupe && self.link_existing(digest, &dest).await {
            tracing::debug!(repo, %digest, "blob deduplicated");
            return Ok(());
        }

        let staged = stage_upload(&self.root, &data).await?;
        if let Err(e) = tokio::fs::rename(&staged, &dest).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e.into());
        }

        if self.options.dedupe {
            self.known_blobs.insert(digest.clone(), dest);
        }
        Ok(())
    }

    async fn get_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<Option<Bytes>> {
        validate_repo_name(repo)?;
        match tokio::fs::read(self.full_path(repo, digest)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn has_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<bool> {
        validate_repo_name(repo)?;
        Ok(tokio::fs::metadata(self.full_path(repo, digest)).await.is_ok())
    }

    async fn delete_blob(&self, repo: &str, digest: &Digest) -> RegistryResult<bool> {
        validate_repo_name(repo)?;
        let path = self.full_path(repo, digest);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.known_blobs.remove_if(digest, |_, known| *known == path);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
