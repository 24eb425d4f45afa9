//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, audit events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout or log file, audit file (JSON)
//!     → metrics extension (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every event; request ID flows through the session log
//! - Metrics are cheap and become no-ops when no exporter is linked

pub mod logging;
pub mod metrics;

use std::path::Path;

/// Log the runtime parameters that commonly limit a registry host.
pub fn dump_runtime_params() {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let read_proc = |path: &str| {
        std::fs::read_to_string(Path::new(path))
            .ok()
            .map(|s| s.trim_end().to_string())
    };

    let backlog = read_proc("/proc/sys/net/core/somaxconn");
    let inotify = read_proc("/proc/sys/fs/inotify/max_user_watches");

    tracing::info!(
        cpus,
        listen_backlog = backlog.as_deref().unwrap_or("unknown"),
        max_inotify_watches = inotify.as_deref().unwrap_or("unknown"),
        "runtime params"
    );
}
