//! The router daemon.
//!
//! # Data Flow
//! ```text
//! AnycastConfig
//!     → Daemon::new (healthchecks, filters, ManagedRoutes)
//!     → start (router check, healthchecks running, listeners spawned)
//!     → every poll_time_secs:
//!           list_route_tables
//!           → per route table entry (sorted by name):
//!                 filter → update_tables → reconcile per table, per route
//!     → shutdown: stop ticking, stop every healthcheck, abort listeners
//! ```
//!
//! # Design Decisions
//! - One snapshot per cycle, shared by every route table entry
//! - Action failures are logged and counted; the cycle carries on
//! - `oneshot` never starts healthchecks and ignores healthcheck bindings

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::cloud::{NodeIdentity, RoutingApi, RoutingError};
use crate::config::schema::{AnycastConfig, RouteTableFind};
use crate::config::validation::ValidationError;
use crate::health::{HealthCheck, HealthError, ProbeRegistry};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::reconcile::{Action, ManageRoutesSpec, ManagedRoute, RemoteReport};
use crate::routing::{filter_route_tables, route_table_for_subnet, RouteFilter};

/// Startup faults.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Instance {0} has source/destination checking enabled and cannot route traffic")]
    NotARouter(String),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error("Invalid configuration: {}", join(.0))]
    Invalid(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run mode switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonOptions {
    /// One cycle without healthchecks, then exit.
    pub oneshot: bool,
    /// Send every API call as a dry run.
    pub noop: bool,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub tables_matched: usize,
    pub actions: Vec<(String, String, Action)>,
    pub errors: usize,
}

struct ManagedTable {
    name: String,
    find: RouteTableFind,
    filter: Box<dyn RouteFilter>,
    routes: Vec<Arc<ManagedRoute>>,
    reports: Vec<Option<tokio::sync::mpsc::UnboundedReceiver<RemoteReport>>>,
}

/// Drives reconciliation for one node.
pub struct Daemon {
    api: Arc<dyn RoutingApi>,
    node: NodeIdentity,
    options: DaemonOptions,
    poll_every: Duration,
    healthchecks: BTreeMap<String, Arc<HealthCheck>>,
    tables: Vec<ManagedTable>,
    listeners: Vec<JoinHandle<()>>,
    shutdown: Shutdown,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("node", &self.node)
            .field("options", &self.options)
            .field("healthchecks", &self.healthchecks.keys().collect::<Vec<_>>())
            .field("tables", &self.tables.iter().map(|t| &t.name).collect::<Vec<_>>())
            .finish()
    }
}

impl Daemon {
    /// Build every runtime object from a validated configuration.
    pub fn new(
        config: &AnycastConfig,
        api: Arc<dyn RoutingApi>,
        node: NodeIdentity,
        registry: ProbeRegistry,
        options: DaemonOptions,
    ) -> Result<Self, DaemonError> {
        let mut healthchecks = BTreeMap::new();
        for (name, hc_config) in &config.healthchecks {
            let hc = HealthCheck::from_config(name.clone(), hc_config)?;
            hc.setup(&registry)?;
            healthchecks.insert(name.clone(), Arc::new(hc));
        }

        let mut templates = BTreeMap::new();
        for (name, hc_config) in &config.remote_healthchecks {
            templates.insert(
                name.clone(),
                Arc::new(HealthCheck::from_config(name.clone(), hc_config)?),
            );
        }

        let mut errors = Vec::new();
        let mut tables = Vec::new();
        for (name, table_config) in &config.route_tables {
            let filter = match table_config.find.build_filter() {
                Ok(filter) => filter,
                Err(find_errors) => {
                    errors.extend(find_errors.into_iter().map(|source| ValidationError::Finder {
                        table: name.clone(),
                        source,
                    }));
                    continue;
                }
            };

            let mut routes = Vec::new();
            let mut reports = Vec::new();
            for route_config in &table_config.manage_routes {
                let spec = match ManageRoutesSpec::resolve(
                    name,
                    route_config,
                    &node.instance_id,
                    &healthchecks,
                    &templates,
                ) {
                    Ok(spec) if options.oneshot => spec.without_healthchecks(),
                    Ok(spec) => spec,
                    Err(mut e) => {
                        errors.append(&mut e);
                        continue;
                    }
                };
                let (route, rx) =
                    ManagedRoute::new(spec, api.clone(), registry.clone(), node.private_ip, options.noop);
                routes.push(route);
                reports.push(rx);
            }

            tables.push(ManagedTable {
                name: name.clone(),
                find: table_config.find.clone(),
                filter,
                routes,
                reports,
            });
        }

        if !errors.is_empty() {
            return Err(DaemonError::Invalid(errors));
        }

        Ok(Self {
            api,
            node,
            options,
            poll_every: Duration::from_secs(config.poll_time_secs.max(1)),
            healthchecks,
            tables,
            listeners: Vec::new(),
            shutdown: Shutdown::new(),
        })
    }

    pub fn healthcheck(&self, name: &str) -> Option<&Arc<HealthCheck>> {
        self.healthchecks.get(name)
    }

    /// Confirm this node can route, then start healthchecks and listeners.
    pub async fn start(&mut self) -> Result<(), DaemonError> {
        let can_route = self
            .api
            .is_source_dest_check_disabled(&self.node.instance_id)
            .await?;
        if !can_route {
            return Err(DaemonError::NotARouter(self.node.instance_id.clone()));
        }

        if self.options.oneshot {
            return Ok(());
        }

        for (name, hc) in &self.healthchecks {
            tracing::debug!(healthcheck = %name, "Starting healthcheck");
            hc.run();
        }

        for table in &mut self.tables {
            for (route, reports) in table.routes.iter().zip(table.reports.iter_mut()) {
                self.listeners
                    .extend(route.spawn_listeners(reports.take(), &self.shutdown));
            }
        }

        tracing::info!(
            instance_id = %self.node.instance_id,
            healthchecks = self.healthchecks.len(),
            route_tables = self.tables.len(),
            noop = self.options.noop,
            "Router started"
        );
        Ok(())
    }

    /// One full snapshot → filter → reconcile pass.
    pub async fn run_cycle(&self) -> Result<CycleReport, RoutingError> {
        let snapshot = match self.api.list_route_tables().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                metrics::record_api_error(e.operation());
                return Err(e);
            }
        };

        if let Some(subnet) = &self.node.subnet_id {
            if let Some(local) = route_table_for_subnet(subnet, &snapshot) {
                tracing::debug!(subnet = %subnet, rtb = %local.id, "Route table for local subnet");
            }
        }

        let mut report = CycleReport::default();
        for table in &self.tables {
            let matched = filter_route_tables(table.filter.as_ref(), &snapshot);
            if matched.is_empty() {
                if !table.find.no_results_ok {
                    tracing::error!(route_table = %table.name, "No route table in the cloud matched filter spec");
                    report.errors += 1;
                }
                for route in &table.routes {
                    if let Err(e) = route.update_tables(&[]).await {
                        tracing::warn!(route_table = %table.name, cidr = %route.spec().cidr, error = %e, "Could not refresh remote healthchecks");
                    }
                }
                continue;
            }
            report.tables_matched += matched.len();

            for route in &table.routes {
                if let Err(e) = route.update_tables(&matched).await {
                    tracing::warn!(route_table = %table.name, cidr = %route.spec().cidr, error = %e, "Could not refresh remote healthchecks");
                }
            }

            for rtb in &matched {
                for route in &table.routes {
                    match route.reconcile_table(rtb).await {
                        Ok(action) => report.actions.push((rtb.id.clone(), route.spec().cidr.clone(), action)),
                        Err(_) => report.errors += 1,
                    }
                }
            }
        }

        tracing::debug!(
            tables_matched = report.tables_matched,
            errors = report.errors,
            "Reconciliation cycle finished"
        );
        Ok(report)
    }

    /// Run until `shutdown` fires, or for one cycle in oneshot mode.
    pub async fn run(mut self, shutdown: Shutdown) -> Result<(), DaemonError> {
        self.start().await?;

        if self.options.oneshot {
            let result = self.run_cycle().await;
            self.stop().await;
            result?;
            return Ok(());
        }

        let mut ticker = time::interval(self.poll_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::warn!(error = %e, "Reconciliation cycle failed");
                    }
                }
                _ = shutdown.wait() => {
                    tracing::info!("Shutdown signal received, stopping router");
                    break;
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Stop healthchecks, remote probes and listener tasks.
    pub async fn stop(&mut self) {
        self.shutdown.trigger();
        for hc in self.healthchecks.values() {
            hc.stop();
        }
        for table in &self.tables {
            for route in &table.routes {
                route.stop();
            }
        }
        for handle in self.listeners.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
        tracing::info!("Router stopped");
    }
}
