//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber from `LogConfig`
//! - Route the main log to stdout or a file
//! - Route `audit` target events to a separate JSON audit file
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - Audit events never reach the main log when an audit file is set

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::config::LogConfig;
use crate::error::{RegistryError, RegistryResult};

/// Target used by the audit middleware.
pub const AUDIT_TARGET: &str = "audit";

fn open_append(path: &Path) -> RegistryResult<Arc<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RegistryError::Config(format!("cannot open log file {}: {e}", path.display())))?;
    Ok(Arc::new(file))
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init_logging(config: &LogConfig) -> RegistryResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "content_registry={0},tower_http={0},{AUDIT_TARGET}=info",
                config.level
            ))
        });

    let has_audit = config.audit.is_some();
    let not_audit = filter_fn(move |meta| !has_audit || meta.target() != AUDIT_TARGET);

    let main_layer = match &config.output {
        Some(path) => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(open_append(path)?)
            .with_filter(not_audit)
            .boxed(),
        None => tracing_subscriber::fmt::layer().with_filter(not_audit).boxed(),
    };

    let audit_layer = match &config.audit {
        Some(path) => Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(open_append(path)?)
                .with_filter(filter_fn(|meta| meta.target() == AUDIT_TARGET))
                .boxed(),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(main_layer)
        .with(audit_layer)
        .try_init()
        .map_err(|e| RegistryError::Config(format!("logging already initialized: {e}")))
}
