//! In-process routing API.
//!
//! # Responsibilities
//! - Hold route tables, interface addresses and instance attributes in memory
//! - Apply create/replace/delete with provider-like semantics
//! - Record every call so callers can assert exact sequences
//! - Load a snapshot file for offline rehearsal of a configuration
//!
//! # Design Decisions
//! - Dry-run calls are validated and recorded but never mutate
//! - Failures can be injected per operation

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Mutex;

use crate::cloud::{RoutingApi, RoutingError};
use crate::routing::{Route, RouteTable};

/// One recorded API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    ListRouteTables,
    CreateRoute {
        table: String,
        cidr: String,
        instance: String,
        dry_run: bool,
    },
    ReplaceRoute {
        table: String,
        cidr: String,
        instance: String,
        dry_run: bool,
    },
    DeleteRoute {
        table: String,
        cidr: String,
        dry_run: bool,
    },
    ResolveNetworkInterfaces {
        ids: Vec<String>,
    },
    IsSourceDestCheckDisabled {
        instance: String,
    },
}

impl ApiCall {
    /// True for create, replace and delete.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ApiCall::CreateRoute { .. } | ApiCall::ReplaceRoute { .. } | ApiCall::DeleteRoute { .. }
        )
    }
}

/// A network interface attached to an instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Interface {
    pub id: String,
    pub instance_id: String,
    pub private_ip: IpAddr,
}

/// Snapshot file layout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub route_tables: Vec<RouteTable>,
    pub interfaces: Vec<Interface>,
    /// Instances with source/destination checking turned off.
    pub routers: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, RouteTable>,
    interfaces: HashMap<String, Interface>,
    routers: HashSet<String>,
    calls: Vec<ApiCall>,
    failing: HashSet<&'static str>,
}

impl Inner {
    fn fail_if_injected(&self, operation: &'static str) -> Result<(), RoutingError> {
        if self.failing.contains(operation) {
            return Err(RoutingError::Api {
                operation,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn table_mut(&mut self, table_id: &str) -> Result<&mut RouteTable, RoutingError> {
        self.tables
            .get_mut(table_id)
            .ok_or_else(|| RoutingError::UnknownTable(table_id.to_string()))
    }

    fn primary_interface(&self, instance_id: &str) -> Option<String> {
        let mut ids: Vec<&Interface> = self
            .interfaces
            .values()
            .filter(|i| i.instance_id == instance_id)
            .collect();
        ids.sort_by(|a, b| a.id.cmp(&b.id));
        ids.first().map(|i| i.id.clone())
    }

    fn instance_route(&self, cidr: &str, instance_id: &str) -> Route {
        let mut route = Route::via_instance(cidr, instance_id, "");
        route.network_interface_id = self.primary_interface(instance_id);
        route
    }
}

/// Strongly consistent in-memory routing store.
#[derive(Debug, Default)]
pub struct InMemoryRoutingApi {
    inner: Mutex<Inner>,
}

impl InMemoryRoutingApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let api = Self::new();
        for table in snapshot.route_tables {
            api.insert_table(table);
        }
        for iface in snapshot.interfaces {
            api.add_interface(&iface.id, &iface.instance_id, iface.private_ip);
        }
        for instance in snapshot.routers {
            api.set_source_dest_check_disabled(&instance, true);
        }
        api
    }

    /// Load a TOML snapshot file.
    pub fn load(path: &Path) -> Result<Self, crate::config::ConfigError> {
        let content = std::fs::read_to_string(path).map_err(crate::config::ConfigError::Io)?;
        let snapshot: Snapshot = toml::from_str(&content).map_err(crate::config::ConfigError::Parse)?;
        Ok(Self::from_snapshot(snapshot))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("routing store mutex poisoned")
    }

    pub fn insert_table(&self, table: RouteTable) {
        self.lock().tables.insert(table.id.clone(), table);
    }

    pub fn add_interface(&self, id: &str, instance_id: &str, private_ip: IpAddr) {
        self.lock().interfaces.insert(
            id.to_string(),
            Interface {
                id: id.to_string(),
                instance_id: instance_id.to_string(),
                private_ip,
            },
        );
    }

    pub fn set_source_dest_check_disabled(&self, instance_id: &str, disabled: bool) {
        let mut inner = self.lock();
        if disabled {
            inner.routers.insert(instance_id.to_string());
        } else {
            inner.routers.remove(instance_id);
        }
    }

    /// Make `operation` (e.g. `"replace_route"`) fail until cleared.
    pub fn fail_operation(&self, operation: &'static str, fail: bool) {
        let mut inner = self.lock();
        if fail {
            inner.failing.insert(operation);
        } else {
            inner.failing.remove(operation);
        }
    }

    /// Current copy of one table.
    pub fn table(&self, table_id: &str) -> Option<RouteTable> {
        self.lock().tables.get(table_id).cloned()
    }

    /// Instance currently targeted by `cidr` in `table_id`.
    pub fn route_owner(&self, table_id: &str, cidr: &str) -> Option<String> {
        self.lock()
            .tables
            .get(table_id)
            .and_then(|t| t.route_for(cidr))
            .and_then(|r| r.instance_id().map(str::to_string))
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<ApiCall> {
        self.lock().calls.iter().filter(|c| c.is_mutation()).cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl RoutingApi for InMemoryRoutingApi {
    async fn list_route_tables(&self) -> Result<Vec<RouteTable>, RoutingError> {
        let mut inner = self.lock();
        inner.calls.push(ApiCall::ListRouteTables);
        inner.fail_if_injected("list_route_tables")?;
        Ok(inner.tables.values().cloned().collect())
    }

    async fn create_route(
        &self,
        table_id: &str,
        cidr: &str,
        instance_id: &str,
        dry_run: bool,
    ) -> Result<(), RoutingError> {
        let mut inner = self.lock();
        inner.calls.push(ApiCall::CreateRoute {
            table: table_id.to_string(),
            cidr: cidr.to_string(),
            instance: instance_id.to_string(),
            dry_run,
        });
        inner.fail_if_injected("create_route")?;

        let route = inner.instance_route(cidr, instance_id);
        let table = inner.table_mut(table_id)?;
        if table.route_for(cidr).is_some() {
            return Err(RoutingError::RouteExists {
                table: table_id.to_string(),
                cidr: cidr.to_string(),
            });
        }
        if !dry_run {
            table.routes.push(route);
        }
        Ok(())
    }

    async fn replace_route(
        &self,
        table_id: &str,
        cidr: &str,
        instance_id: &str,
        dry_run: bool,
    ) -> Result<(), RoutingError> {
        let mut inner = self.lock();
        inner.calls.push(ApiCall::ReplaceRoute {
            table: table_id.to_string(),
            cidr: cidr.to_string(),
            instance: instance_id.to_string(),
            dry_run,
        });
        inner.fail_if_injected("replace_route")?;

        let replacement = inner.instance_route(cidr, instance_id);
        let table = inner.table_mut(table_id)?;
        let route = table.route_for_mut(cidr).ok_or_else(|| RoutingError::UnknownRoute {
            table: table_id.to_string(),
            cidr: cidr.to_string(),
        })?;
        if !dry_run {
            *route = replacement;
        }
        Ok(())
    }

    async fn delete_route(&self, table_id: &str, cidr: &str, dry_run: bool) -> Result<(), RoutingError> {
        let mut inner = self.lock();
        inner.calls.push(ApiCall::DeleteRoute {
            table: table_id.to_string(),
            cidr: cidr.to_string(),
            dry_run,
        });
        inner.fail_if_injected("delete_route")?;

        let table = inner.table_mut(table_id)?;
        let before = table.routes.len();
        if dry_run {
            if table.route_for(cidr).is_none() {
                return Err(RoutingError::UnknownRoute {
                    table: table_id.to_string(),
                    cidr: cidr.to_string(),
                });
            }
            return Ok(());
        }
        table.routes.retain(|r| r.destination_cidr != cidr);
        if table.routes.len() == before {
            return Err(RoutingError::UnknownRoute {
                table: table_id.to_string(),
                cidr: cidr.to_string(),
            });
        }
        Ok(())
    }

    async fn resolve_network_interfaces(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, IpAddr>, RoutingError> {
        let mut inner = self.lock();
        inner.calls.push(ApiCall::ResolveNetworkInterfaces { ids: ids.to_vec() });
        inner.fail_if_injected("resolve_network_interfaces")?;
        Ok(ids
            .iter()
            .filter_map(|id| inner.interfaces.get(id).map(|i| (id.clone(), i.private_ip)))
            .collect())
    }

    async fn is_source_dest_check_disabled(&self, instance_id: &str) -> Result<bool, RoutingError> {
        let mut inner = self.lock();
        inner.calls.push(ApiCall::IsSourceDestCheckDisabled {
            instance: instance_id.to_string(),
        });
        inner.fail_if_injected("is_source_dest_check_disabled")?;
        Ok(inner.routers.contains(instance_id))
    }
}
