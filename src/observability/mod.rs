//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, journald, shipper)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields (rtb, cidr, healthcheck, destination) on every event
//! - Metrics are cheap and safe to record with no exporter installed

pub mod logging;
pub mod metrics;
