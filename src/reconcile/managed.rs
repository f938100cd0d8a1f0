//! Per-route runtime.
//!
//! # Responsibilities
//! - Remember which route tables a managed route currently applies to
//! - Keep the remote probe set aimed at the current owners
//! - Re-run reconciliation for those tables when local or remote health
//!   changes
//!
//! # Design Decisions
//! - Health-triggered runs fetch a fresh snapshot; they never reuse the
//!   snapshot of the cycle that recorded the tables
//! - A remote report re-evaluates every tracked table, not only the one the
//!   owner was seen in

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cloud::{RoutingApi, RoutingError};
use crate::health::ProbeRegistry;
use crate::lifecycle::Shutdown;
use crate::reconcile::reconciler::{Action, RemoteStatus, RouteReconciler};
use crate::reconcile::remote::{RemoteHealthOrchestrator, RemoteReport};
use crate::reconcile::spec::ManageRoutesSpec;
use crate::routing::RouteTable;

/// One managed route bound to the tables it was last matched in.
#[derive(Debug)]
pub struct ManagedRoute {
    spec: ManageRoutesSpec,
    reconciler: RouteReconciler,
    remote: Option<RemoteHealthOrchestrator>,
    tracked: Mutex<Vec<String>>,
    dry_run: bool,
}

impl ManagedRoute {
    /// Build the runtime. The receiver is present when the spec names a
    /// remote healthcheck.
    pub fn new(
        spec: ManageRoutesSpec,
        api: Arc<dyn RoutingApi>,
        registry: ProbeRegistry,
        local_ip: IpAddr,
        dry_run: bool,
    ) -> (Arc<Self>, Option<mpsc::UnboundedReceiver<RemoteReport>>) {
        let (remote, reports) = match &spec.remote_template {
            Some(template) => {
                let (orch, rx) =
                    RemoteHealthOrchestrator::new(template.clone(), registry, api.clone(), local_ip);
                (Some(orch), Some(rx))
            }
            None => (None, None),
        };
        let route = Self {
            spec,
            reconciler: RouteReconciler::new(api),
            remote,
            tracked: Mutex::new(Vec::new()),
            dry_run,
        };
        (Arc::new(route), reports)
    }

    pub fn spec(&self) -> &ManageRoutesSpec {
        &self.spec
    }

    pub fn remote(&self) -> Option<&RemoteHealthOrchestrator> {
        self.remote.as_ref()
    }

    /// Table ids recorded by the last [`ManagedRoute::update_tables`].
    pub fn tracked_tables(&self) -> Vec<String> {
        self.tracked.lock().expect("tracked tables mutex poisoned").clone()
    }

    /// Record the tables this route now applies to and refresh remote probes.
    pub async fn update_tables(&self, tables: &[RouteTable]) -> Result<(), RoutingError> {
        *self.tracked.lock().expect("tracked tables mutex poisoned") =
            tables.iter().map(|t| t.id.clone()).collect();
        match &self.remote {
            Some(remote) => remote.refresh(&self.spec.cidr, tables).await,
            None => Ok(()),
        }
    }

    fn remote_status(&self, table: &RouteTable) -> RemoteStatus {
        let interface = table
            .route_for(&self.spec.cidr)
            .and_then(|r| r.network_interface_id.as_deref());
        match (&self.remote, interface) {
            (Some(remote), Some(id)) => remote.status_for_interface(id),
            _ => RemoteStatus::Untracked,
        }
    }

    /// Reconcile this route in one table.
    pub async fn reconcile_table(&self, table: &RouteTable) -> Result<Action, RoutingError> {
        self.reconciler
            .reconcile(table, &self.spec, self.remote_status(table), self.dry_run)
            .await
    }

    /// Reconcile every tracked table against a fresh snapshot.
    pub async fn reevaluate(&self, trigger: &str) {
        let tracked = self.tracked_tables();
        if tracked.is_empty() {
            return;
        }

        tracing::info!(cidr = %self.spec.cidr, trigger, tables = tracked.len(), "Healthcheck status change, reevaluating current routes");

        let tables = match self.reconciler.api().list_route_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                crate::observability::metrics::record_api_error(e.operation());
                tracing::warn!(cidr = %self.spec.cidr, error = %e, "Could not fetch route tables");
                return;
            }
        };

        for table in tables.iter().filter(|t| tracked.contains(&t.id)) {
            if let Err(e) = self.reconcile_table(table).await {
                tracing::warn!(rtb = %table.id, cidr = %self.spec.cidr, error = %e, "Error reevaluating route");
            }
        }
    }

    /// Spawn the tasks that turn health changes into re-evaluation.
    pub fn spawn_listeners(
        self: &Arc<Self>,
        reports: Option<mpsc::UnboundedReceiver<RemoteReport>>,
        shutdown: &Shutdown,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        if let Some(hc) = &self.spec.healthcheck {
            let mut subscription = hc.subscribe();
            let mut stop = shutdown.subscribe();
            let route = self.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        status = subscription.rx.recv() => match status {
                            Some(healthy) => {
                                let trigger = if healthy { "local healthy" } else { "local unhealthy" };
                                route.reevaluate(trigger).await;
                            }
                            None => break,
                        },
                        _ = stop.recv() => break,
                    }
                }
            }));
        }

        if let Some(mut reports) = reports {
            let mut stop = shutdown.subscribe();
            let route = self.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        report = reports.recv() => match report {
                            Some(report) => {
                                tracing::debug!(destination = %report.ip, healthy = report.healthy, "Remote healthcheck report");
                                route.reevaluate("remote").await;
                            }
                            None => break,
                        },
                        _ = stop.recv() => break,
                    }
                }
            }));
        }

        handles
    }

    /// Stop remote probes.
    pub fn stop(&self) {
        if let Some(remote) = &self.remote {
            remote.stop_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{ApiCall, InMemoryRoutingApi};
    use crate::config::schema::HealthCheckConfig;
    use crate::health::testing::ScriptedProbes;
    use crate::health::HealthCheck;
    use crate::routing::Route;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const CIDR: &str = "0.0.0.0/0";

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn scripted(name: &str, destination: Option<IpAddr>) -> HealthCheck {
        let config = HealthCheckConfig {
            kind: "scripted".into(),
            destination: destination.map(|d| d.to_string()),
            rise: 1,
            fall: 1,
            ..Default::default()
        };
        HealthCheck::from_config(name, &config).unwrap()
    }

    fn store() -> Arc<InMemoryRoutingApi> {
        let api = Arc::new(InMemoryRoutingApi::new());
        api.add_interface("eni-me", "i-me", ip(1));
        api.add_interface("eni-peer", "i-peer", ip(2));
        api.insert_table(
            RouteTable::new("rtb-1", "vpc-1").with_route(Route::via_instance(CIDR, "i-peer", "eni-peer")),
        );
        api.insert_table(
            RouteTable::new("rtb-2", "vpc-1").with_route(Route::via_instance(CIDR, "i-peer", "eni-peer")),
        );
        api.insert_table(RouteTable::new("rtb-other", "vpc-1"));
        api
    }

    async fn wait_for_owner(api: &InMemoryRoutingApi, table: &str, owner: &str) {
        for _ in 0..100 {
            if api.route_owner(table, CIDR).as_deref() == Some(owner) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("{table} never routed to {owner}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_takes_over_all_tracked_tables() {
        let probes = ScriptedProbes::new();
        let registry = probes.registry();
        let api = store();
        let template = Arc::new(scripted("peer", None));
        let spec = ManageRoutesSpec::new(CIDR, "i-me")
            .if_unhealthy(true)
            .with_remote_template(template);

        let (route, reports) = ManagedRoute::new(spec, api.clone(), registry, ip(1), false);
        let shutdown = Shutdown::new();
        let handles = route.spawn_listeners(reports, &shutdown);

        let tables: Vec<RouteTable> = api
            .list_route_tables()
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.id != "rtb-other")
            .collect();
        route.update_tables(&tables).await.unwrap();
        assert_eq!(route.tracked_tables(), vec!["rtb-1".to_string(), "rtb-2".to_string()]);
        assert_eq!(route.remote().unwrap().tracked_ips(), vec![ip(2)]);

        // incumbent is active and not known to be down
        for table in &tables {
            assert_eq!(route.reconcile_table(table).await.unwrap(), Action::Noop);
        }

        probes.set(ip(2), false);
        wait_for_owner(&api, "rtb-1", "i-me").await;
        wait_for_owner(&api, "rtb-2", "i-me").await;
        assert!(api.table("rtb-other").unwrap().routes.is_empty());

        shutdown.trigger();
        route.stop();
        for h in handles {
            let _ = h.await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_failure_deletes_own_route() {
        let probes = ScriptedProbes::new();
        let registry = probes.registry();
        let api = Arc::new(InMemoryRoutingApi::new());
        api.add_interface("eni-me", "i-me", ip(1));
        api.insert_table(RouteTable::new("rtb-1", "vpc-1"));

        let hc = Arc::new(scripted("public", Some(ip(9))));
        hc.setup(&registry).unwrap();
        let spec = ManageRoutesSpec::new(CIDR, "i-me").with_healthcheck(hc.clone());
        let (route, reports) = ManagedRoute::new(spec, api.clone(), registry, ip(1), false);
        assert!(reports.is_none());

        let shutdown = Shutdown::new();
        let handles = route.spawn_listeners(reports, &shutdown);
        route.update_tables(&api.list_route_tables().await.unwrap()).await.unwrap();

        hc.run();
        wait_for_owner(&api, "rtb-1", "i-me").await;
        api.clear_calls();

        probes.set(ip(9), false);
        for _ in 0..100 {
            if api.route_owner("rtb-1", CIDR).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(api.route_owner("rtb-1", CIDR).is_none());

        // later failed runs publish nothing new
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            api.mutations(),
            vec![ApiCall::DeleteRoute {
                table: "rtb-1".into(),
                cidr: CIDR.into(),
                dry_run: false,
            }]
        );

        hc.stop();
        shutdown.trigger();
        for h in handles {
            let _ = h.await;
        }
    }
}
