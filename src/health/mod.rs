//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Configuration (HealthCheckConfig):
//!     → active.rs validate_healthcheck (aggregated errors)
//!     → HealthCheck::setup resolves the kind through probes.rs
//!
//! Runtime (active.rs):
//!     Periodic timer
//!     → Prober::probe (bounded by timeout)
//!     → state.rs (debounced rise/fall)
//!     → on transition: hooks + listeners.rs fan-out
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Fan-out never blocks the prober
//! - Rebinding to a new destination produces a fresh healthcheck

pub mod active;
pub mod listeners;
pub mod probes;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use active::{validate_healthcheck, HealthCheck, HealthError};
pub use listeners::{Listeners, Subscription};
pub use probes::{ProbeError, ProbeRegistry, Prober};
pub use state::HealthState;
