//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (axum-server)
//!     → security::rate_limit (global + per-method buckets)
//!     → request ID (set, propagated)
//!     → middleware.rs (CORS, session log, panic recovery, audit)
//!     → routes.rs (access control, store selection, blob I/O)
//!     → Send to client
//! ```

pub mod middleware;
pub mod routes;
pub mod server;

pub use routes::AppState;
pub use server::{build_router, serve};
