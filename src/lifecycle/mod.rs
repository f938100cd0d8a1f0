//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → poll loop exits → healthchecks stopped → listener tasks aborted
//! ```
//!
//! # Design Decisions
//! - One broadcast channel per stoppable unit (daemon, each healthcheck)
//! - Stopping is idempotent everywhere

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
