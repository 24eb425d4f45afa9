//! TCP listener binding.
//!
//! # Responsibilities
//! - Bind the configured `address:port`
//! - Report "address in use" distinctly from other bind failures
//!
//! # Design Decisions
//! - Returns a non-blocking std listener; `axum_server` adopts it directly
//!   so the bound address is known before serving starts

use std::io::ErrorKind;
use std::net::TcpListener;

use crate::error::{RegistryError, RegistryResult};

/// Bind `host:port`. Port `0` picks a free port.
pub fn bind(host: &str, port: u16) -> RegistryResult<TcpListener> {
    let addr = format!("{host}:{port}");

    let listener = TcpListener::bind((host, port)).map_err(|e| match e.kind() {
        ErrorKind::AddrInUse => RegistryError::AddressInUse(addr.clone()),
        _ => RegistryError::Bind {
            addr: addr.clone(),
            source: e,
        },
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|e| RegistryError::Bind { addr: addr.clone(), source: e })?;

    if let Ok(local) = listener.local_addr() {
        tracing::info!(address = %local, "Listener bound");
    }

    Ok(listener)
}
