//! Route table snapshot model.
//!
//! # Responsibilities
//! - Represent one read-only snapshot of a cloud route table
//! - Provide builders used by backends and tests to assemble snapshots
//!
//! # Design Decisions
//! - A route has exactly one target, enforced by the enum; targets this crate
//!   never writes (NAT gateways, peerings, transit gateways) are kept as `Other`
//! - Snapshots are plain values; nothing here talks to the routing API

use serde::Deserialize;
use std::fmt;

/// A key/value tag attached to a route table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// A subnet association of a route table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Association {
    /// Subnet bound by this association, if any.
    pub subnet_id: Option<String>,
    /// True for the VPC's main (default) association.
    pub main: bool,
}

impl Association {
    /// Explicit association with a subnet.
    pub fn subnet(subnet_id: impl Into<String>) -> Self {
        Self {
            subnet_id: Some(subnet_id.into()),
            main: false,
        }
    }

    /// The main association.
    pub fn main() -> Self {
        Self {
            subnet_id: None,
            main: true,
        }
    }
}

/// Where a route sends traffic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RouteTarget {
    Instance { instance_id: String },
    Gateway { gateway_id: String },
    /// NAT gateway, peering connection, transit gateway or bare interface.
    Other { target_id: String },
}

/// How the route came to exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOrigin {
    CreateRouteTable,
    #[default]
    CreateRoute,
    EnableVgwRoutePropagation,
}

/// Provider-reported state of a route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    #[default]
    Active,
    Inactive,
    Blackhole,
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RouteState::Active => "active",
            RouteState::Inactive => "inactive",
            RouteState::Blackhole => "blackhole",
        };
        f.write_str(s)
    }
}

/// A single destination → target rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Route {
    pub destination_cidr: String,
    #[serde(flatten)]
    pub target: RouteTarget,
    /// Interface carrying the traffic when the target is an instance.
    #[serde(default)]
    pub network_interface_id: Option<String>,
    #[serde(default)]
    pub origin: RouteOrigin,
    #[serde(default)]
    pub state: RouteState,
}

impl Route {
    /// Active route to an instance through one of its interfaces.
    pub fn via_instance(
        cidr: impl Into<String>,
        instance_id: impl Into<String>,
        network_interface_id: impl Into<String>,
    ) -> Self {
        Self {
            destination_cidr: cidr.into(),
            target: RouteTarget::Instance {
                instance_id: instance_id.into(),
            },
            network_interface_id: Some(network_interface_id.into()),
            origin: RouteOrigin::CreateRoute,
            state: RouteState::Active,
        }
    }

    /// Active route to a gateway.
    pub fn via_gateway(cidr: impl Into<String>, gateway_id: impl Into<String>) -> Self {
        Self {
            destination_cidr: cidr.into(),
            target: RouteTarget::Gateway {
                gateway_id: gateway_id.into(),
            },
            network_interface_id: None,
            origin: RouteOrigin::CreateRoute,
            state: RouteState::Active,
        }
    }

    /// Active route to any other attachment.
    pub fn via_target(cidr: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            destination_cidr: cidr.into(),
            target: RouteTarget::Other {
                target_id: target_id.into(),
            },
            network_interface_id: None,
            origin: RouteOrigin::CreateRoute,
            state: RouteState::Active,
        }
    }

    pub fn with_state(mut self, state: RouteState) -> Self {
        self.state = state;
        self
    }

    /// Instance id when the route targets an instance.
    pub fn instance_id(&self) -> Option<&str> {
        match &self.target {
            RouteTarget::Instance { instance_id } => Some(instance_id),
            _ => None,
        }
    }

    /// Gateway id when the route targets a gateway.
    pub fn gateway_id(&self) -> Option<&str> {
        match &self.target {
            RouteTarget::Gateway { gateway_id } => Some(gateway_id),
            _ => None,
        }
    }
}

/// A snapshot of one route table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteTable {
    pub id: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub associations: Vec<Association>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(id: impl Into<String>, vpc_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vpc_id: vpc_id.into(),
            tags: Vec::new(),
            associations: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// The route for `cidr`, by exact string match.
    pub fn route_for(&self, cidr: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.destination_cidr == cidr)
    }

    pub(crate) fn route_for_mut(&mut self, cidr: &str) -> Option<&mut Route> {
        self.routes.iter_mut().find(|r| r.destination_cidr == cidr)
    }
}
