//! Remote health orchestration.
//!
//! # Responsibilities
//! - Discover who currently owns a CIDR across the matched route tables
//! - Keep exactly one probe running per non-local owner IP
//! - Forward every status report from those probes to the owner of the
//!   orchestrator
//!
//! # Design Decisions
//! - Interface → IP mappings are cached per orchestrator, never globally
//! - Unknown interfaces are fetched in one batched call per refresh
//! - A failed resolution aborts the refresh and leaves current probes alone
//! - Refreshes are serialised; status reads never wait on the API

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cloud::{RoutingApi, RoutingError};
use crate::health::{HealthCheck, ProbeRegistry};
use crate::observability::metrics;
use crate::reconcile::reconciler::RemoteStatus;
use crate::routing::RouteTable;

/// A status report from a remote probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteReport {
    pub ip: IpAddr,
    pub healthy: bool,
}

#[derive(Debug)]
struct Tracked {
    check: Arc<HealthCheck>,
    subscription_id: u64,
    forwarder: JoinHandle<()>,
}

impl Tracked {
    fn stop(self) {
        self.check.unsubscribe(self.subscription_id);
        self.check.stop();
        self.forwarder.abort();
    }
}

#[derive(Debug, Default)]
struct State {
    probes: HashMap<IpAddr, Tracked>,
    interface_ips: HashMap<String, IpAddr>,
}

/// Probes aimed at whoever currently owns a route.
#[derive(Debug)]
pub struct RemoteHealthOrchestrator {
    template: Arc<HealthCheck>,
    registry: ProbeRegistry,
    api: Arc<dyn RoutingApi>,
    local_ip: IpAddr,
    state: Mutex<State>,
    refresh_gate: tokio::sync::Mutex<()>,
    reports: mpsc::UnboundedSender<RemoteReport>,
}

impl RemoteHealthOrchestrator {
    /// Returns the orchestrator and the stream of probe reports.
    pub fn new(
        template: Arc<HealthCheck>,
        registry: ProbeRegistry,
        api: Arc<dyn RoutingApi>,
        local_ip: IpAddr,
    ) -> (Self, mpsc::UnboundedReceiver<RemoteReport>) {
        let (reports, rx) = mpsc::unbounded_channel();
        (
            Self {
                template,
                registry,
                api,
                local_ip,
                state: Mutex::new(State::default()),
                refresh_gate: tokio::sync::Mutex::new(()),
                reports,
            },
            rx,
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("orchestrator state mutex poisoned")
    }

    /// Converge the probe set on the owners of `cidr` in `tables`.
    pub async fn refresh(&self, cidr: &str, tables: &[RouteTable]) -> Result<(), RoutingError> {
        let _gate = self.refresh_gate.lock().await;

        let interfaces: BTreeSet<String> = tables
            .iter()
            .filter_map(|t| t.route_for(cidr))
            .filter_map(|r| r.network_interface_id.clone())
            .filter(|id| !id.is_empty())
            .collect();

        let missing: Vec<String> = {
            let state = self.lock();
            interfaces
                .iter()
                .filter(|id| !state.interface_ips.contains_key(*id))
                .cloned()
                .collect()
        };

        if !missing.is_empty() {
            let resolved = match self.api.resolve_network_interfaces(&missing).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    metrics::record_api_error(e.operation());
                    return Err(e);
                }
            };
            let mut state = self.lock();
            state.interface_ips.extend(resolved);
            if let Some(unresolved) = missing.iter().find(|id| !state.interface_ips.contains_key(*id)) {
                tracing::warn!(
                    cidr,
                    network_interface = %unresolved,
                    "Could not resolve route owner, keeping current remote probes"
                );
                return Err(RoutingError::UnresolvedInterface(unresolved.clone()));
            }
        }

        let mut state = self.lock();
        let owners: BTreeSet<IpAddr> = interfaces
            .iter()
            .filter_map(|id| state.interface_ips.get(id).copied())
            .filter(|ip| *ip != self.local_ip)
            .collect();

        let stale: Vec<IpAddr> = state
            .probes
            .keys()
            .filter(|ip| !owners.contains(*ip))
            .copied()
            .collect();
        for ip in stale {
            if let Some(tracked) = state.probes.remove(&ip) {
                tracing::info!(
                    cidr,
                    remote_healthcheck = %self.template.name(),
                    destination = %ip,
                    "Stopping remote healthcheck, no longer a route owner"
                );
                tracked.stop();
            }
        }

        for ip in owners {
            if state.probes.contains_key(&ip) {
                continue;
            }
            match self.start_probe(ip) {
                Ok(tracked) => {
                    tracing::info!(
                        cidr,
                        remote_healthcheck = %self.template.name(),
                        destination = %ip,
                        "Starting remote healthcheck on route owner"
                    );
                    state.probes.insert(ip, tracked);
                }
                Err(e) => {
                    tracing::error!(destination = %ip, error = %e, "Could not start remote healthcheck");
                }
            }
        }

        metrics::record_remote_probes(state.probes.len());
        Ok(())
    }

    fn start_probe(&self, ip: IpAddr) -> Result<Tracked, crate::health::HealthError> {
        let check = self.template.new_with_destination(ip, &self.registry)?;
        let mut subscription = check.subscribe();
        let subscription_id = subscription.id;
        check.run();

        let reports = self.reports.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(healthy) = subscription.rx.recv().await {
                if reports.send(RemoteReport { ip, healthy }).is_err() {
                    break;
                }
            }
        });

        Ok(Tracked {
            check,
            subscription_id,
            forwarder,
        })
    }

    /// Probe state for the owner behind `network_interface_id`.
    pub fn status_for_interface(&self, network_interface_id: &str) -> RemoteStatus {
        let state = self.lock();
        let Some(ip) = state.interface_ips.get(network_interface_id) else {
            return RemoteStatus::Untracked;
        };
        match state.probes.get(ip) {
            None => RemoteStatus::Untracked,
            Some(t) if !t.check.can_report_yet() => RemoteStatus::NotReady,
            Some(t) if t.check.is_healthy() => RemoteStatus::Healthy,
            Some(_) => RemoteStatus::Unhealthy,
        }
    }

    /// Owner IPs currently probed, sorted.
    pub fn tracked_ips(&self) -> Vec<IpAddr> {
        let mut ips: Vec<IpAddr> = self.lock().probes.keys().copied().collect();
        ips.sort();
        ips
    }

    /// The probe aimed at `ip`, if that owner is tracked.
    pub fn check_for(&self, ip: IpAddr) -> Option<Arc<HealthCheck>> {
        self.lock().probes.get(&ip).map(|t| t.check.clone())
    }

    /// Stop every probe.
    pub fn stop_all(&self) {
        let mut state = self.lock();
        for (_, tracked) in state.probes.drain() {
            tracked.stop();
        }
        metrics::record_remote_probes(0);
    }
}

impl Drop for RemoteHealthOrchestrator {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            for (_, tracked) in state.probes.drain() {
                tracked.stop();
            }
        }
    }
}
