//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     HttpConfig → policy.rs (TLS suites, curves, client-cert mode)
//!
//! Incoming request:
//!     → rate_limit.rs (global and per-method buckets)
//!     → access_control.rs (LiveConfig rules, matcher.rs patterns)
//!     → Pass to storage
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - Corrupt trust material aborts startup
//! - No trust in client input

pub mod access_control;
pub mod matcher;
pub mod policy;
pub mod rate_limit;

pub use policy::{resolve_security_policy, ClientAuth, SecurityPolicy};
