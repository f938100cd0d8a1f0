//! Cloud routing API subsystem.
//!
//! # Data Flow
//! ```text
//! Daemon / reconciler
//!     → RoutingApi (trait)
//!         → memory.rs  (in-process store: tests, snapshot rehearsal)
//!         → ec2.rs     (AWS EC2, feature `aws`)
//!     ← RouteTable snapshots, interface → IP maps, call results
//! ```
//!
//! # Design Decisions
//! - The provider is the single source of truth; nothing caches route tables
//!   across cycles
//! - Every mutating call carries `dry_run` down to the provider
//! - Errors are returned as-is; retry belongs to the next poll cycle

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use thiserror::Error;

use crate::routing::RouteTable;

#[cfg(feature = "aws")]
pub mod ec2;
pub mod memory;

pub use memory::{ApiCall, InMemoryRoutingApi};

/// Routing API failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    #[error("Network interface {0} could not be resolved to a private IP")]
    UnresolvedInterface(String),

    #[error("Route table {0} not found")]
    UnknownTable(String),

    #[error("Route table {table} has no route for {cidr}")]
    UnknownRoute { table: String, cidr: String },

    #[error("Route table {table} already has a route for {cidr}")]
    RouteExists { table: String, cidr: String },

    #[error("Instance metadata lookup failed: {0}")]
    Metadata(String),
}

impl RoutingError {
    /// Name of the API operation that failed, for metrics.
    pub fn operation(&self) -> &'static str {
        match self {
            RoutingError::Api { operation, .. } => operation,
            RoutingError::UnresolvedInterface(_) => "resolve_network_interfaces",
            RoutingError::UnknownTable(_) => "lookup_table",
            RoutingError::UnknownRoute { .. } => "lookup_route",
            RoutingError::RouteExists { .. } => "create_route",
            RoutingError::Metadata(_) => "instance_metadata",
        }
    }
}

/// Provider routing operations the router depends on.
#[async_trait]
pub trait RoutingApi: Send + Sync + std::fmt::Debug {
    /// Snapshot every route table visible to this node.
    async fn list_route_tables(&self) -> Result<Vec<RouteTable>, RoutingError>;

    async fn create_route(
        &self,
        table_id: &str,
        cidr: &str,
        instance_id: &str,
        dry_run: bool,
    ) -> Result<(), RoutingError>;

    async fn replace_route(
        &self,
        table_id: &str,
        cidr: &str,
        instance_id: &str,
        dry_run: bool,
    ) -> Result<(), RoutingError>;

    async fn delete_route(&self, table_id: &str, cidr: &str, dry_run: bool) -> Result<(), RoutingError>;

    /// Resolve network interface ids to their primary private IPs in one call.
    async fn resolve_network_interfaces(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, IpAddr>, RoutingError>;

    /// True when the instance may forward traffic it does not own.
    async fn is_source_dest_check_disabled(&self, instance_id: &str) -> Result<bool, RoutingError>;
}

/// Who this process is running as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub instance_id: String,
    pub private_ip: IpAddr,
    pub subnet_id: Option<String>,
    pub region: Option<String>,
}
