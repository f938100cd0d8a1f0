//! Per-CIDR route reconciliation.
//!
//! # Responsibilities
//! - Decide the single action one route table needs for one managed CIDR
//! - Issue that action through the routing API, honouring dry-run
//! - Run route hooks around replace and delete
//!
//! # Design Decisions
//! - [`decide`] is pure; everything it needs is read up front
//! - API failures are returned unmodified; retry is the poll loop's job
//! - Hooks are skipped in dry-run and after a failed call

use std::sync::Arc;

use crate::cloud::{RoutingApi, RoutingError};
use crate::hooks;
use crate::observability::metrics;
use crate::reconcile::spec::ManageRoutesSpec;
use crate::routing::{Route, RouteState, RouteTable};

/// State of the remote probe aimed at the current route owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// No probe tracks the owner.
    Untracked,
    /// Tracked, but not enough samples yet.
    NotReady,
    Healthy,
    Unhealthy,
}

/// Local healthcheck reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalStatus {
    pub healthy: bool,
    pub reportable: bool,
}

impl LocalStatus {
    fn failed(self) -> bool {
        !self.healthy && self.reportable
    }
}

/// Everything observed about one CIDR in one table.
#[derive(Debug, Clone, Copy)]
pub struct Observed<'a> {
    pub route: Option<&'a Route>,
    pub local: Option<LocalStatus>,
    pub remote: RemoteStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Replace,
    Delete,
    Noop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Replace => "replace",
            Action::Delete => "delete",
            Action::Noop => "noop",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action and the rule that chose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub reason: &'static str,
}

impl Decision {
    fn new(action: Action, reason: &'static str) -> Self {
        Self { action, reason }
    }
}

/// Pick the action for `spec` given what was observed.
pub fn decide(spec: &ManageRoutesSpec, observed: &Observed<'_>) -> Decision {
    let locally_ok = observed.local.map_or(true, |s| s.healthy);
    let locally_failed = observed.local.is_some_and(LocalStatus::failed);

    let Some(route) = observed.route else {
        return match observed.local {
            _ if locally_ok => Decision::new(Action::Create, "route absent"),
            Some(s) if s.reportable => Decision::new(Action::Noop, "route absent, local healthcheck unhealthy"),
            _ => Decision::new(Action::Noop, "route absent, local healthcheck not ready"),
        };
    };

    if route.instance_id() == Some(spec.instance.as_str()) {
        return match (locally_failed, spec.never_delete) {
            (true, true) => Decision::new(Action::Noop, "local healthcheck unhealthy, never_delete set"),
            (true, false) => Decision::new(Action::Delete, "local healthcheck unhealthy"),
            (false, _) => Decision::new(Action::Noop, "already routed to this instance"),
        };
    }

    if locally_failed {
        return Decision::new(Action::Noop, "local healthcheck unhealthy, not taking over");
    }

    if spec.if_unhealthy && route.state == RouteState::Active {
        return match observed.remote {
            RemoteStatus::Unhealthy => Decision::new(Action::Replace, "remote healthcheck on current owner failed"),
            RemoteStatus::NotReady => Decision::new(Action::Noop, "incumbent active, remote healthcheck not ready"),
            RemoteStatus::Healthy => Decision::new(Action::Noop, "incumbent active, remote healthcheck healthy"),
            RemoteStatus::Untracked => Decision::new(Action::Noop, "incumbent active"),
        };
    }

    if spec.if_unhealthy {
        Decision::new(Action::Replace, "incumbent route not active")
    } else {
        Decision::new(Action::Replace, "route targets another instance")
    }
}

/// Applies decisions through a routing API.
#[derive(Debug, Clone)]
pub struct RouteReconciler {
    api: Arc<dyn RoutingApi>,
}

impl RouteReconciler {
    pub fn new(api: Arc<dyn RoutingApi>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<dyn RoutingApi> {
        &self.api
    }

    /// Bring `cidr` in `table` to the state `spec` asks for.
    ///
    /// Returns the action taken. With `dry_run` the action is still sent,
    /// flagged as a simulation.
    pub async fn reconcile(
        &self,
        table: &RouteTable,
        spec: &ManageRoutesSpec,
        remote: RemoteStatus,
        dry_run: bool,
    ) -> Result<Action, RoutingError> {
        let route = table.route_for(&spec.cidr);
        let local = spec
            .local_status()
            .map(|(healthy, reportable)| LocalStatus { healthy, reportable });
        let decision = decide(spec, &Observed { route, local, remote });

        let owner = route.and_then(Route::instance_id).unwrap_or("-");
        if decision.action == Action::Noop {
            tracing::debug!(
                vpc = %table.vpc_id,
                rtb = %table.id,
                cidr = %spec.cidr,
                my_instance = %spec.instance,
                instance_id = owner,
                healthcheck = spec.healthcheck_name.as_deref().unwrap_or("-"),
                healthcheck_healthy = local.map(|s| s.healthy),
                healthcheck_ready = local.map(|s| s.reportable),
                remote_healthcheck = spec.remote_healthcheck_name.as_deref().unwrap_or("-"),
                decision = %decision.action,
                reason = decision.reason,
                dry_run,
                "No route change"
            );
        } else {
            tracing::info!(
                vpc = %table.vpc_id,
                rtb = %table.id,
                cidr = %spec.cidr,
                my_instance = %spec.instance,
                instance_id = owner,
                healthcheck = spec.healthcheck_name.as_deref().unwrap_or("-"),
                healthcheck_healthy = local.map(|s| s.healthy),
                healthcheck_ready = local.map(|s| s.reportable),
                remote_healthcheck = spec.remote_healthcheck_name.as_deref().unwrap_or("-"),
                decision = %decision.action,
                reason = decision.reason,
                dry_run,
                "Changing route"
            );
        }

        let result = match decision.action {
            Action::Noop => Ok(()),
            Action::Create => {
                self.api
                    .create_route(&table.id, &spec.cidr, &spec.instance, dry_run)
                    .await
            }
            Action::Replace => {
                self.with_hooks(
                    dry_run,
                    ("run_before_replace_route", spec.hooks.before_replace.as_slice()),
                    ("run_after_replace_route", spec.hooks.after_replace.as_slice()),
                    self.api.replace_route(&table.id, &spec.cidr, &spec.instance, dry_run),
                )
                .await
            }
            Action::Delete => {
                self.with_hooks(
                    dry_run,
                    ("run_before_delete_route", spec.hooks.before_delete.as_slice()),
                    ("run_after_delete_route", spec.hooks.after_delete.as_slice()),
                    self.api.delete_route(&table.id, &spec.cidr, dry_run),
                )
                .await
            }
        };

        match result {
            Ok(()) => {
                metrics::record_route_action(decision.action.as_str());
                Ok(decision.action)
            }
            Err(e) => {
                metrics::record_api_error(e.operation());
                tracing::warn!(
                    rtb = %table.id,
                    cidr = %spec.cidr,
                    decision = %decision.action,
                    error = %e,
                    "Route change failed"
                );
                Err(e)
            }
        }
    }

    async fn with_hooks<F>(
        &self,
        dry_run: bool,
        before: (&str, &[String]),
        after: (&str, &[String]),
        call: F,
    ) -> Result<(), RoutingError>
    where
        F: std::future::Future<Output = Result<(), RoutingError>>,
    {
        if !dry_run {
            hooks::run_hook(before.0, before.1, hooks::DEFAULT_HOOK_TIMEOUT).await;
        }
        call.await?;
        if !dry_run {
            hooks::run_hook(after.0, after.1, hooks::DEFAULT_HOOK_TIMEOUT).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{ApiCall, InMemoryRoutingApi};
    use std::net::{IpAddr, Ipv4Addr};

    const CIDR: &str = "0.0.0.0/0";

    fn healthy() -> Option<LocalStatus> {
        Some(LocalStatus { healthy: true, reportable: true })
    }

    fn failed() -> Option<LocalStatus> {
        Some(LocalStatus { healthy: false, reportable: true })
    }

    fn warming_up() -> Option<LocalStatus> {
        Some(LocalStatus { healthy: false, reportable: false })
    }

    fn observed(route: Option<&Route>, local: Option<LocalStatus>) -> Observed<'_> {
        Observed { route, local, remote: RemoteStatus::Untracked }
    }

    #[test]
    fn test_decide_absent_route() {
        let spec = ManageRoutesSpec::new(CIDR, "i-me");
        assert_eq!(decide(&spec, &observed(None, None)).action, Action::Create);
        assert_eq!(decide(&spec, &observed(None, healthy())).action, Action::Create);
        assert_eq!(decide(&spec, &observed(None, failed())).action, Action::Noop);
        assert_eq!(decide(&spec, &observed(None, warming_up())).action, Action::Noop);
    }

    #[test]
    fn test_decide_owned_route() {
        let route = Route::via_instance(CIDR, "i-me", "eni-me");
        let spec = ManageRoutesSpec::new(CIDR, "i-me");
        assert_eq!(decide(&spec, &observed(Some(&route), None)).action, Action::Noop);
        assert_eq!(decide(&spec, &observed(Some(&route), healthy())).action, Action::Noop);
        assert_eq!(decide(&spec, &observed(Some(&route), warming_up())).action, Action::Noop);
        assert_eq!(decide(&spec, &observed(Some(&route), failed())).action, Action::Delete);

        let keep = spec.never_delete(true);
        assert_eq!(decide(&keep, &observed(Some(&route), failed())).action, Action::Noop);
    }

    #[test]
    fn test_decide_foreign_route() {
        let route = Route::via_instance(CIDR, "i-other", "eni-other");
        let spec = ManageRoutesSpec::new(CIDR, "i-me");
        assert_eq!(decide(&spec, &observed(Some(&route), None)).action, Action::Replace);
        assert_eq!(decide(&spec, &observed(Some(&route), healthy())).action, Action::Replace);
        assert_eq!(decide(&spec, &observed(Some(&route), failed())).action, Action::Noop);

        let gateway = Route::via_gateway(CIDR, "igw-1");
        assert_eq!(decide(&spec, &observed(Some(&gateway), None)).action, Action::Replace);

        let nat = Route::via_target(CIDR, "nat-1");
        assert_eq!(decide(&spec, &observed(Some(&nat), None)).action, Action::Replace);
        assert_eq!(decide(&spec, &observed(Some(&nat), failed())).action, Action::Noop);
    }

    #[test]
    fn test_decide_if_unhealthy_leaves_active_incumbent() {
        let spec = ManageRoutesSpec::new(CIDR, "i-me").if_unhealthy(true);
        let active = Route::via_instance(CIDR, "i-other", "eni-other");
        let blackhole = active.clone().with_state(RouteState::Blackhole);

        assert_eq!(decide(&spec, &observed(Some(&active), healthy())).action, Action::Noop);
        assert_eq!(decide(&spec, &observed(Some(&blackhole), healthy())).action, Action::Replace);

        for (remote, want) in [
            (RemoteStatus::Untracked, Action::Noop),
            (RemoteStatus::NotReady, Action::Noop),
            (RemoteStatus::Healthy, Action::Noop),
            (RemoteStatus::Unhealthy, Action::Replace),
        ] {
            let obs = Observed { route: Some(&active), local: healthy(), remote };
            assert_eq!(decide(&spec, &obs).action, want, "{remote:?}");
        }
    }

    fn store_with(route: Option<Route>) -> (Arc<InMemoryRoutingApi>, RouteTable) {
        let api = Arc::new(InMemoryRoutingApi::new());
        api.add_interface("eni-me", "i-me", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        api.add_interface("eni-other", "i-other", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        let mut table = RouteTable::new("rtb-1", "vpc-1");
        if let Some(route) = route {
            table = table.with_route(route);
        }
        api.insert_table(table.clone());
        (api, table)
    }

    #[tokio::test]
    async fn test_reconcile_creates_once_then_noop() {
        let (api, table) = store_with(None);
        let reconciler = RouteReconciler::new(api.clone());
        let spec = ManageRoutesSpec::new(CIDR, "i-me");

        let action = reconciler
            .reconcile(&table, &spec, RemoteStatus::Untracked, false)
            .await
            .unwrap();
        assert_eq!(action, Action::Create);
        assert_eq!(
            api.mutations(),
            vec![ApiCall::CreateRoute {
                table: "rtb-1".into(),
                cidr: CIDR.into(),
                instance: "i-me".into(),
                dry_run: false,
            }]
        );

        let fresh = api.table("rtb-1").unwrap();
        api.clear_calls();
        let action = reconciler
            .reconcile(&fresh, &spec, RemoteStatus::Untracked, false)
            .await
            .unwrap();
        assert_eq!(action, Action::Noop);
        assert!(api.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_replace_then_noop() {
        let (api, table) = store_with(Some(Route::via_instance(CIDR, "i-other", "eni-other")));
        let reconciler = RouteReconciler::new(api.clone());
        let spec = ManageRoutesSpec::new(CIDR, "i-me");

        let action = reconciler
            .reconcile(&table, &spec, RemoteStatus::Untracked, false)
            .await
            .unwrap();
        assert_eq!(action, Action::Replace);
        assert_eq!(api.route_owner("rtb-1", CIDR).as_deref(), Some("i-me"));

        let fresh = api.table("rtb-1").unwrap();
        assert_eq!(
            reconciler
                .reconcile(&fresh, &spec, RemoteStatus::Untracked, false)
                .await
                .unwrap(),
            Action::Noop
        );
    }

    #[tokio::test]
    async fn test_reconcile_replaces_nat_target() {
        let (api, table) = store_with(Some(Route::via_target(CIDR, "nat-1")));
        let reconciler = RouteReconciler::new(api.clone());
        let spec = ManageRoutesSpec::new(CIDR, "i-me");

        let action = reconciler
            .reconcile(&table, &spec, RemoteStatus::Untracked, false)
            .await
            .unwrap();
        assert_eq!(action, Action::Replace);
        assert_eq!(
            api.mutations(),
            vec![ApiCall::ReplaceRoute {
                table: "rtb-1".into(),
                cidr: CIDR.into(),
                instance: "i-me".into(),
                dry_run: false,
            }]
        );
        assert_eq!(api.route_owner("rtb-1", CIDR).as_deref(), Some("i-me"));
    }

    #[tokio::test]
    async fn test_reconcile_keeps_active_incumbent() {
        let (api, table) = store_with(Some(Route::via_instance(CIDR, "i-other", "eni-other")));
        let reconciler = RouteReconciler::new(api.clone());
        let spec = ManageRoutesSpec::new(CIDR, "i-me").if_unhealthy(true);

        let action = reconciler
            .reconcile(&table, &spec, RemoteStatus::Untracked, false)
            .await
            .unwrap();
        assert_eq!(action, Action::Noop);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_dry_run_reaches_api() {
        let (api, table) = store_with(None);
        let reconciler = RouteReconciler::new(api.clone());
        let spec = ManageRoutesSpec::new(CIDR, "i-me");

        reconciler
            .reconcile(&table, &spec, RemoteStatus::Untracked, true)
            .await
            .unwrap();
        assert_eq!(
            api.mutations(),
            vec![ApiCall::CreateRoute {
                table: "rtb-1".into(),
                cidr: CIDR.into(),
                instance: "i-me".into(),
                dry_run: true,
            }]
        );
        assert!(api.route_owner("rtb-1", CIDR).is_none());
    }

    #[tokio::test]
    async fn test_reconcile_returns_api_error_unmodified() {
        let (api, table) = store_with(Some(Route::via_instance(CIDR, "i-other", "eni-other")));
        api.fail_operation("replace_route", true);
        let reconciler = RouteReconciler::new(api.clone());
        let spec = ManageRoutesSpec::new(CIDR, "i-me");

        let err = reconciler
            .reconcile(&table, &spec, RemoteStatus::Untracked, false)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RoutingError::Api {
                operation: "replace_route",
                message: "injected failure".into(),
            }
        );
        assert_eq!(api.route_owner("rtb-1", CIDR).as_deref(), Some("i-other"));
    }
}
