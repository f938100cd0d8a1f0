//! Anycast failover router library.

// Core subsystems
pub mod config;
pub mod health;
pub mod reconcile;
pub mod routing;

// Outer surfaces
pub mod cloud;
pub mod daemon;
pub mod hooks;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::AnycastConfig;
pub use daemon::{Daemon, DaemonError, DaemonOptions};
pub use lifecycle::Shutdown;
