//! AWS EC2 routing backend.
//!
//! # Responsibilities
//! - Translate routing calls to the EC2 API
//! - Map EC2 route tables into snapshots
//! - Discover node identity from the instance metadata service
//!
//! # Design Decisions
//! - `dry_run` is passed straight to EC2; its `DryRunOperation` reply means
//!   the call would have succeeded and is reported as success
//! - Source/destination check results are cached per client instance

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{self as ec2, InstanceAttributeName};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use crate::cloud::{NodeIdentity, RoutingApi, RoutingError};
use crate::config::schema::NodeConfig;
use crate::routing::{Association, Route, RouteOrigin, RouteState, RouteTable, RouteTarget, Tag};

const DRY_RUN_CODE: &str = "DryRunOperation";

/// Routing API backed by EC2.
#[derive(Debug)]
pub struct Ec2RoutingApi {
    client: aws_sdk_ec2::Client,
    src_dst_cache: Mutex<HashMap<String, bool>>,
}

impl Ec2RoutingApi {
    pub async fn new(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let sdk_config = loader.load().await;
        Self {
            client: aws_sdk_ec2::Client::new(&sdk_config),
            src_dst_cache: Mutex::new(HashMap::new()),
        }
    }
}

fn api_error<E>(operation: &'static str, err: SdkError<E>) -> RoutingError
where
    E: std::error::Error + 'static,
{
    RoutingError::Api {
        operation,
        message: DisplayErrorContext(&err).to_string(),
    }
}

fn mutation_result<T, E>(
    operation: &'static str,
    dry_run: bool,
    result: Result<T, SdkError<E>>,
) -> Result<(), RoutingError>
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match result {
        Ok(_) => Ok(()),
        Err(e) if dry_run && e.as_service_error().and_then(|s| s.code()) == Some(DRY_RUN_CODE) => {
            tracing::debug!(operation, "Dry run would have succeeded");
            Ok(())
        }
        Err(e) => Err(api_error(operation, e)),
    }
}

fn convert_table(rt: &ec2::RouteTable) -> Option<RouteTable> {
    let mut table = RouteTable::new(rt.route_table_id()?, rt.vpc_id().unwrap_or_default());

    table.tags = rt
        .tags()
        .iter()
        .filter_map(|t| {
            Some(Tag {
                key: t.key()?.to_string(),
                value: t.value().unwrap_or_default().to_string(),
            })
        })
        .collect();

    table.associations = rt
        .associations()
        .iter()
        .map(|a| Association {
            subnet_id: a.subnet_id().map(str::to_string),
            main: a.main().unwrap_or(false),
        })
        .collect();

    table.routes = rt.routes().iter().filter_map(convert_route).collect();
    Some(table)
}

fn convert_route(r: &ec2::Route) -> Option<Route> {
    let target = match (r.instance_id(), r.gateway_id()) {
        (Some(instance_id), _) => RouteTarget::Instance {
            instance_id: instance_id.to_string(),
        },
        (None, Some(gateway_id)) => RouteTarget::Gateway {
            gateway_id: gateway_id.to_string(),
        },
        (None, None) => RouteTarget::Other {
            target_id: other_target(r)?.to_string(),
        },
    };

    let state = match r.state() {
        Some(ec2::RouteState::Blackhole) => RouteState::Blackhole,
        Some(ec2::RouteState::Active) | None => RouteState::Active,
        Some(_) => RouteState::Inactive,
    };

    let origin = match r.origin() {
        Some(ec2::RouteOrigin::CreateRouteTable) => RouteOrigin::CreateRouteTable,
        Some(ec2::RouteOrigin::EnableVgwRoutePropagation) => RouteOrigin::EnableVgwRoutePropagation,
        _ => RouteOrigin::CreateRoute,
    };

    Some(Route {
        destination_cidr: r.destination_cidr_block()?.to_string(),
        target,
        network_interface_id: r.network_interface_id().map(str::to_string),
        origin,
        state,
    })
}

/// Id of a target that is neither an instance nor a gateway.
fn other_target(r: &ec2::Route) -> Option<&str> {
    r.nat_gateway_id()
        .or(r.vpc_peering_connection_id())
        .or(r.transit_gateway_id())
        .or(r.egress_only_internet_gateway_id())
        .or(r.local_gateway_id())
        .or(r.carrier_gateway_id())
        .or(r.core_network_arn())
        .or(r.network_interface_id())
}

#[async_trait]
impl RoutingApi for Ec2RoutingApi {
    async fn list_route_tables(&self) -> Result<Vec<RouteTable>, RoutingError> {
        let mut tables = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .client
                .describe_route_tables()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| api_error("describe_route_tables", e))?;
            tables.extend(out.route_tables().iter().filter_map(convert_table));
            match out.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(tables)
    }

    async fn create_route(
        &self,
        table_id: &str,
        cidr: &str,
        instance_id: &str,
        dry_run: bool,
    ) -> Result<(), RoutingError> {
        let result = self
            .client
            .create_route()
            .route_table_id(table_id)
            .destination_cidr_block(cidr)
            .instance_id(instance_id)
            .dry_run(dry_run)
            .send()
            .await;
        mutation_result("create_route", dry_run, result)
    }

    async fn replace_route(
        &self,
        table_id: &str,
        cidr: &str,
        instance_id: &str,
        dry_run: bool,
    ) -> Result<(), RoutingError> {
        let result = self
            .client
            .replace_route()
            .route_table_id(table_id)
            .destination_cidr_block(cidr)
            .instance_id(instance_id)
            .dry_run(dry_run)
            .send()
            .await;
        mutation_result("replace_route", dry_run, result)
    }

    async fn delete_route(&self, table_id: &str, cidr: &str, dry_run: bool) -> Result<(), RoutingError> {
        let result = self
            .client
            .delete_route()
            .route_table_id(table_id)
            .destination_cidr_block(cidr)
            .dry_run(dry_run)
            .send()
            .await;
        mutation_result("delete_route", dry_run, result)
    }

    async fn resolve_network_interfaces(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, IpAddr>, RoutingError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let out = self
            .client
            .describe_network_interfaces()
            .set_network_interface_ids(Some(ids.to_vec()))
            .send()
            .await
            .map_err(|e| api_error("describe_network_interfaces", e))?;

        Ok(out
            .network_interfaces()
            .iter()
            .filter_map(|ni| {
                let id = ni.network_interface_id()?;
                let ip = ni.private_ip_address()?.parse::<IpAddr>().ok()?;
                Some((id.to_string(), ip))
            })
            .collect())
    }

    async fn is_source_dest_check_disabled(&self, instance_id: &str) -> Result<bool, RoutingError> {
        let cached = self
            .src_dst_cache
            .lock()
            .expect("src/dst cache mutex poisoned")
            .get(instance_id)
            .copied();
        if let Some(disabled) = cached {
            return Ok(disabled);
        }

        let out = self
            .client
            .describe_instance_attribute()
            .instance_id(instance_id)
            .attribute(InstanceAttributeName::SourceDestCheck)
            .send()
            .await
            .map_err(|e| api_error("describe_instance_attribute", e))?;

        let enabled = out
            .source_dest_check()
            .and_then(|v| v.value())
            .unwrap_or(true);

        self.src_dst_cache
            .lock()
            .expect("src/dst cache mutex poisoned")
            .insert(instance_id.to_string(), !enabled);
        Ok(!enabled)
    }
}

async fn imds_get(client: &aws_config::imds::Client, path: &str) -> Result<String, RoutingError> {
    client
        .get(path)
        .await
        .map(String::from)
        .map_err(|e| RoutingError::Metadata(format!("{path}: {e}")))
}

/// Fill the node identity, asking instance metadata for anything not configured.
pub async fn node_identity_from_metadata(node: &NodeConfig) -> Result<NodeIdentity, RoutingError> {
    let imds = aws_config::imds::Client::builder().build();

    let instance_id = match &node.instance_id {
        Some(id) => id.clone(),
        None => imds_get(&imds, "/latest/meta-data/instance-id").await?,
    };

    let private_ip = match node.private_ip {
        Some(ip) => ip,
        None => {
            let raw = imds_get(&imds, "/latest/meta-data/local-ipv4").await?;
            raw.trim()
                .parse()
                .map_err(|_| RoutingError::Metadata(format!("local-ipv4 '{raw}' is not an address")))?
        }
    };

    let subnet_id = match &node.subnet_id {
        Some(s) => Some(s.clone()),
        None => {
            let mac = imds_get(&imds, "/latest/meta-data/mac").await?;
            let path = format!("/latest/meta-data/network/interfaces/macs/{}/subnet-id", mac.trim());
            Some(imds_get(&imds, &path).await?)
        }
    };

    let region = match &node.region {
        Some(r) => Some(r.clone()),
        None => Some(imds_get(&imds, "/latest/meta-data/placement/region").await?),
    };

    tracing::info!(instance_id = %instance_id, private_ip = %private_ip, "Resolved node identity");

    Ok(NodeIdentity {
        instance_id,
        private_ip,
        subnet_id,
        region,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_route_keeps_foreign_targets() {
        let nat = ec2::Route::builder()
            .destination_cidr_block("0.0.0.0/0")
            .nat_gateway_id("nat-0abc")
            .state(ec2::RouteState::Active)
            .build();
        let route = convert_route(&nat).unwrap();
        assert_eq!(
            route.target,
            RouteTarget::Other {
                target_id: "nat-0abc".into()
            }
        );
        assert_eq!(route.instance_id(), None);
        assert_eq!(route.gateway_id(), None);
        assert_eq!(route.state, RouteState::Active);

        let peering = ec2::Route::builder()
            .destination_cidr_block("10.8.0.0/16")
            .vpc_peering_connection_id("pcx-1")
            .state(ec2::RouteState::Blackhole)
            .build();
        let route = convert_route(&peering).unwrap();
        assert_eq!(route.target, RouteTarget::Other { target_id: "pcx-1".into() });
        assert_eq!(route.state, RouteState::Blackhole);
    }

    #[test]
    fn test_convert_route_instance_and_gateway() {
        let instance = ec2::Route::builder()
            .destination_cidr_block("0.0.0.0/0")
            .instance_id("i-1")
            .network_interface_id("eni-1")
            .build();
        let route = convert_route(&instance).unwrap();
        assert_eq!(route.instance_id(), Some("i-1"));
        assert_eq!(route.network_interface_id.as_deref(), Some("eni-1"));

        let igw = ec2::Route::builder()
            .destination_cidr_block("0.0.0.0/0")
            .gateway_id("igw-1")
            .build();
        assert_eq!(convert_route(&igw).unwrap().gateway_id(), Some("igw-1"));

        let bare = ec2::Route::builder().destination_cidr_block("0.0.0.0/0").build();
        assert!(convert_route(&bare).is_none());
    }
}
