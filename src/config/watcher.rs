//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file itself: editors and
//! config-management tools usually save by writing a temp file and renaming
//! it over the original, which drops a watch held on the old inode.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::RegistryConfig;

/// Sends a freshly loaded and validated config whenever the file changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<RegistryConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and the receiving end of its update stream.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<RegistryConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Sender that feeds the same update stream (used by the SIGHUP handler).
    pub fn sender(&self) -> mpsc::UnboundedSender<RegistryConfig> {
        self.update_tx.clone()
    }

    /// Start watching on notify's background thread.
    ///
    /// The returned watcher must be kept alive for as long as updates are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = self.path.file_name().map(OsString::from);

        let tx = self.update_tx;
        let path = self.path.clone();
        // last config delivered; editors often emit several events per save
        let last = Mutex::new(load_config(&path).ok());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(error = %e, "config watch error");
                        return;
                    }
                };
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                if !event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) {
                    return;
                }

                match load_config(&path) {
                    Ok(new_config) => {
                        let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
                        if last.as_ref() == Some(&new_config) {
                            tracing::debug!(path = %path.display(), "config file touched without changes");
                            return;
                        }
                        tracing::info!(path = %path.display(), "config file change detected, reloading");
                        *last = Some(new_config.clone());
                        let _ = tx.send(new_config);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to reload config, keeping current configuration");
                    }
                }
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %self.path.display(), "config watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "[storage]\nroot_directory = \"/data\"\n";

    #[tokio::test]
    async fn rename_over_file_delivers_new_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(&path, BASE).unwrap();

        let (watcher, mut updates) = ConfigWatcher::new(&path);
        let _guard = watcher.run().unwrap();

        let staged = dir.path().join(".registry.toml.tmp");
        std::fs::write(&staged, format!("{BASE}dedupe = false\n")).unwrap();
        std::fs::rename(&staged, &path).unwrap();

        let config = tokio::time::timeout(Duration::from_secs(10), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!config.storage.store.dedupe);
    }

    #[tokio::test]
    async fn invalid_file_is_not_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(&path, BASE).unwrap();

        let (watcher, mut updates) = ConfigWatcher::new(&path);
        let _guard = watcher.run().unwrap();

        std::fs::write(&path, "[storage\n").unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(500), updates.recv()).await;
        assert!(waited.is_err());
    }
}
