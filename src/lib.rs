//! Content registry core.
//!
//! Resolves where artifacts are stored (local or remote, one global store or
//! many path-scoped stores) and runs the registry through start, hot reload
//! and graceful shutdown while background maintenance is in flight.

pub mod config;
pub mod error;
pub mod extensions;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod storage;

pub use config::schema::RegistryConfig;
pub use error::{RegistryError, RegistryResult};
pub use extensions::{linked_extensions, DisabledExtensions, Extensions};
pub use lifecycle::{Controller, ControllerState};
