//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (controller.rs):
//!     Security policy → Storage topology → Background tasks → Bind → Serve
//!
//! Reload (controller.rs, live.rs):
//!     Watcher / SIGHUP → validated config → LiveConfig swap → sync start
//!
//! Shutdown (controller.rs, shutdown.rs, tasks.rs):
//!     Signal received → intent broadcast → task group empty → drain → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     SIGHUP → Trigger config reload
//! ```
//!
//! # Design Decisions
//! - Ordered startup: storage is fully built before any task starts
//! - Ordered shutdown: background work, then listener drain
//! - The listener drain is bounded by `http.shutdown_grace_secs`

pub mod controller;
pub mod live;
pub mod shutdown;
pub mod signals;
pub mod tasks;

pub use controller::{Controller, ControllerState};
pub use live::LiveConfig;
pub use shutdown::{Shutdown, ShutdownListener};
pub use tasks::{BackgroundTasks, TaskCoordinator};
