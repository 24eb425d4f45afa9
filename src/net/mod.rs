//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! http.address:http.port
//!     → listener.rs (bind, address-in-use detection)
//!     → tls.rs (rustls config from the resolved SecurityPolicy, optional)
//!     → handed to axum-server with the controller's Handle
//! ```
//!
//! # Design Decisions
//! - TLS is enabled only when both certificate and key are configured
//! - The socket is bound before serving so bind errors surface from `run`

pub mod listener;
pub mod tls;
