//! Registry-wide error taxonomy.
//!
//! Construction-time failures bubble up as `RegistryError` values through the
//! security and storage resolvers to the controller, which hands them to its
//! caller. Only `CapabilityDegraded` is recovered locally (the affected feature
//! is switched off and a warning is logged).

use std::path::PathBuf;

use thiserror::Error;

use crate::config::loader::ConfigError;

/// Errors raised while assembling or running the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Missing or contradictory configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The configuration file could not be loaded.
    #[error(transparent)]
    ConfigLoad(#[from] ConfigError),

    /// A storage driver name other than the supported remote driver.
    #[error("unsupported storage driver: {0}")]
    UnsupportedDriver(String),

    /// No root directory was configured for the default backend.
    #[error("no storage root directory configured")]
    NoStorageConfigured,

    /// A backend could not be created (driver factory or filesystem failure).
    #[error("storage unavailable at {root}: {reason}")]
    StorageUnavailable { root: PathBuf, reason: String },

    /// A backend capability was probed and found missing.
    #[error("capability degraded at {root}: {reason}")]
    CapabilityDegraded { root: PathBuf, reason: String },

    /// The trusted client CA file contains no usable certificate.
    #[error("bad CA certificate file: {0}")]
    BadCaCert(PathBuf),

    /// The listen address is already taken by another process.
    #[error("address already in use: {0}")]
    AddressInUse(String),

    /// Any other failure to bind the listening socket.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A content digest that does not parse or does not match its content.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// The controller was asked to do something its state does not allow.
    #[error("invalid lifecycle state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    /// The HTTP server terminated with an error.
    #[error("server error: {0}")]
    Serve(std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Build a `StorageUnavailable` error for the given root.
    pub fn storage_unavailable(root: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::StorageUnavailable {
            root: root.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors the caller may recover from by degrading a feature.
    pub fn is_degradation(&self) -> bool {
        matches!(self, Self::CapabilityDegraded { .. })
    }
}

/// Convenience result alias.
pub type RegistryResult<T> = Result<T, RegistryError>;
