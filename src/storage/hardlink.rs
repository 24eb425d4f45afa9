//! Hard-link capability probe.
//!
//! Dedupe on a local store links identical blobs together, so the target
//! filesystem has to support `link(2)` within the root.

use std::fs;
use std::path::Path;

use uuid::Uuid;

use crate::error::RegistryError;

/// Something that can tell whether a root supports hard links.
pub trait HardlinkProbe: Send + Sync {
    /// `Ok(())` when hard links work under `root`, `CapabilityDegraded` otherwise.
    fn validate(&self, root: &Path) -> Result<(), RegistryError>;
}

/// Probe that creates and links a scratch file inside the root.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsHardlinkProbe;

impl HardlinkProbe for FsHardlinkProbe {
    fn validate(&self, root: &Path) -> Result<(), RegistryError> {
        validate_hardlink(root)
    }
}

/// Create `root` if needed, then link a scratch file to prove hard links work.
pub fn validate_hardlink(root: &Path) -> Result<(), RegistryError> {
    let degraded = |reason: std::io::Error| RegistryError::CapabilityDegraded {
        root: root.to_path_buf(),
        reason: reason.to_string(),
    };

    fs::create_dir_all(root).map_err(degraded)?;

    let probe = root.join(format!(".hardlink-probe-{}", Uuid::new_v4()));
    let link = probe.with_extension("link");

    fs::write(&probe, b"probe").map_err(degraded)?;
    let linked = fs::hard_link(&probe, &link);

    let _ = fs::remove_file(&link);
    let _ = fs::remove_file(&probe);

    linked.map_err(degraded)
}
