//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RegistryConfig (validated)
//!     → handed to the controller at startup
//!
//! On reload (file change or SIGHUP):
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → controller swaps LiveConfig (access control + sync only)
//! ```
//!
//! # Design Decisions
//! - Storage, listener and TLS settings are fixed for the life of the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AccessControlConfig, ExtensionsConfig, HttpConfig, LogConfig, RegistryConfig, StorageConfig,
    StoreConfig, SyncConfig, TlsConfig,
};
