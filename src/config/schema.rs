//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::routing::cidr::normalize_cidr;

/// Instance placeholder meaning "the node running this process".
pub const SELF_INSTANCE: &str = "SELF";

/// Root configuration for the anycast router.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnycastConfig {
    /// Seconds between full reconciliation cycles.
    pub poll_time_secs: u64,

    /// Local node identity overrides.
    pub node: NodeConfig,

    /// Healthchecks with a fixed destination, by name.
    pub healthchecks: BTreeMap<String, HealthCheckConfig>,

    /// Healthcheck templates aimed at the current route owner, by name.
    pub remote_healthchecks: BTreeMap<String, HealthCheckConfig>,

    /// Route table selectors and the routes managed in them, by name.
    pub route_tables: BTreeMap<String, RouteTableConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for AnycastConfig {
    fn default() -> Self {
        Self {
            poll_time_secs: 300,
            node: NodeConfig::default(),
            healthchecks: BTreeMap::new(),
            remote_healthchecks: BTreeMap::new(),
            route_tables: BTreeMap::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AnycastConfig {
    /// Fill zero-valued fields with their defaults and normalise CIDRs.
    pub fn apply_defaults(&mut self) {
        if self.poll_time_secs == 0 {
            self.poll_time_secs = 300;
        }
        for hc in self
            .healthchecks
            .values_mut()
            .chain(self.remote_healthchecks.values_mut())
        {
            hc.apply_defaults();
        }
        for table in self.route_tables.values_mut() {
            for route in &mut table.manage_routes {
                route.apply_defaults();
            }
        }
    }
}

/// Local node identity. Missing fields are looked up from instance metadata.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Instance id of this node.
    pub instance_id: Option<String>,

    /// Primary private IP of this node, excluded from remote probing.
    pub private_ip: Option<IpAddr>,

    /// Subnet this node lives in.
    pub subnet_id: Option<String>,

    /// Cloud region.
    pub region: Option<String>,
}

/// Healthcheck configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Probe kind (`ping`, `tcp`, `command`, or a registered kind).
    #[serde(rename = "type")]
    pub kind: String,

    /// Probe target. Required for local checks, forbidden for templates.
    pub destination: Option<String>,

    /// Consecutive successes needed to become healthy.
    pub rise: u32,

    /// Consecutive failures needed to become unhealthy.
    pub fall: u32,

    /// Seconds between probes.
    pub every_secs: u64,

    /// Upper bound for a single probe, in seconds.
    pub timeout_secs: u64,

    /// Command run when the check turns healthy.
    pub run_on_healthy: Vec<String>,

    /// Command run when the check turns unhealthy.
    pub run_on_unhealthy: Vec<String>,

    /// Kind-specific parameters.
    pub config: toml::Table,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            kind: String::new(),
            destination: None,
            rise: 0,
            fall: 0,
            every_secs: 0,
            timeout_secs: 0,
            run_on_healthy: Vec::new(),
            run_on_unhealthy: Vec::new(),
            config: toml::Table::new(),
        }
    }
}

impl HealthCheckConfig {
    pub fn apply_defaults(&mut self) {
        if self.rise == 0 {
            self.rise = 2;
        }
        if self.fall == 0 {
            self.fall = 3;
        }
        if self.every_secs == 0 {
            self.every_secs = 1;
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = 5;
        }
    }
}

/// One route table selector with the routes to manage in the matches.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteTableConfig {
    /// Selects the route tables this entry applies to.
    pub find: RouteTableFind,

    /// Routes to keep pointed at a healthy instance.
    #[serde(default)]
    pub manage_routes: Vec<ManageRouteConfig>,
}

/// A route table finder: a filter plus negation and empty-result policy.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouteTableFind {
    #[serde(flatten)]
    pub kind: FindKind,

    /// Invert the filter.
    #[serde(default)]
    pub not: bool,

    /// Matching nothing is expected rather than an error.
    #[serde(default)]
    pub no_results_ok: bool,
}

impl RouteTableFind {
    pub fn new(kind: FindKind) -> Self {
        Self {
            kind,
            not: false,
            no_results_ok: false,
        }
    }
}

/// Finder kinds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FindKind {
    ByTag {
        key: String,
        value: String,
    },
    ByTagRegexp {
        key: String,
        regexp: String,
    },
    And {
        filters: Vec<RouteTableFind>,
    },
    Or {
        filters: Vec<RouteTableFind>,
    },
    Main,
    Subnet {
        subnet_id: String,
    },
    HasRouteTo {
        cidr: String,
        #[serde(default)]
        via_igw: bool,
        #[serde(default)]
        via_instance: bool,
        #[serde(default)]
        instance_not_active: bool,
    },
}

/// Desired state for one CIDR in the matched route tables.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ManageRouteConfig {
    /// Destination block; a bare address means a host route.
    pub cidr: String,

    /// Target instance id, or `SELF` for this node.
    pub instance: String,

    /// Name of a local healthcheck gating this route.
    pub healthcheck: Option<String>,

    /// Name of a remote healthcheck template aimed at the current owner.
    pub remote_healthcheck: Option<String>,

    /// Leave an active route owned by another instance alone.
    pub if_unhealthy: bool,

    /// Keep our own route even when the local check fails.
    pub never_delete: bool,

    /// Commands run around a route replacement.
    pub run_before_replace_route: Vec<String>,
    pub run_after_replace_route: Vec<String>,

    /// Commands run around a route deletion.
    pub run_before_delete_route: Vec<String>,
    pub run_after_delete_route: Vec<String>,
}

impl Default for ManageRouteConfig {
    fn default() -> Self {
        Self {
            cidr: String::new(),
            instance: SELF_INSTANCE.to_string(),
            healthcheck: None,
            remote_healthcheck: None,
            if_unhealthy: false,
            never_delete: false,
            run_before_replace_route: Vec::new(),
            run_after_replace_route: Vec::new(),
            run_before_delete_route: Vec::new(),
            run_after_delete_route: Vec::new(),
        }
    }
}

impl ManageRouteConfig {
    pub fn apply_defaults(&mut self) {
        if !self.cidr.is_empty() {
            self.cidr = normalize_cidr(&self.cidr);
        }
        if self.instance.is_empty() {
            self.instance = SELF_INSTANCE.to_string();
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: AnycastConfig = toml::from_str("").unwrap();
        assert_eq!(config.poll_time_secs, 300);
        assert!(config.route_tables.is_empty());
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_healthcheck_defaults() {
        let mut hc: HealthCheckConfig = toml::from_str(r#"type = "ping""#).unwrap();
        hc.apply_defaults();
        assert_eq!((hc.rise, hc.fall, hc.every_secs, hc.timeout_secs), (2, 3, 1, 5));
    }

    #[test]
    fn test_manage_route_defaults() {
        let mut route: ManageRouteConfig = toml::from_str(r#"cidr = "10.0.0.1""#).unwrap();
        route.apply_defaults();
        assert_eq!(route.cidr, "10.0.0.1/32");
        assert_eq!(route.instance, SELF_INSTANCE);

        let mut route: ManageRouteConfig = toml::from_str(r#"cidr = "0.0.0.0/0""#).unwrap();
        route.apply_defaults();
        assert_eq!(route.cidr, "0.0.0.0/0");
    }

    #[test]
    fn test_parse_finder_tree() {
        let src = r#"
            [find]
            type = "and"
            filters = [
                { type = "by_tag", key = "Name", value = "private" },
                { type = "main", not = true },
                { type = "has_route_to", cidr = "0.0.0.0/0", via_instance = true },
            ]

            [[manage_routes]]
            cidr = "0.0.0.0/0"
            healthcheck = "public"
        "#;
        let table: RouteTableConfig = toml::from_str(src).unwrap();
        let FindKind::And { filters } = &table.find.kind else {
            panic!("expected and finder");
        };
        assert_eq!(filters.len(), 3);
        assert_eq!(
            filters[0].kind,
            FindKind::ByTag {
                key: "Name".into(),
                value: "private".into()
            }
        );
        assert!(filters[1].not);
        assert!(matches!(
            filters[2].kind,
            FindKind::HasRouteTo { via_instance: true, via_igw: false, .. }
        ));
        assert_eq!(table.manage_routes[0].healthcheck.as_deref(), Some("public"));
    }
}
