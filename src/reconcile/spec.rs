//! Resolved managed-route specifications.
//!
//! # Responsibilities
//! - Bind a [`ManageRouteConfig`] to this node and to live healthcheck objects
//! - Substitute `SELF` with the local instance id
//! - Reject names that do not resolve

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::schema::{ManageRouteConfig, SELF_INSTANCE};
use crate::config::validation::ValidationError;
use crate::health::HealthCheck;
use crate::routing::cidr::{normalize_cidr, parse_cidr};

/// Commands run around route mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteHooks {
    pub before_replace: Vec<String>,
    pub after_replace: Vec<String>,
    pub before_delete: Vec<String>,
    pub after_delete: Vec<String>,
}

/// Desired state for one CIDR, ready for reconciliation.
#[derive(Debug, Clone)]
pub struct ManageRoutesSpec {
    pub cidr: String,
    pub instance: String,
    pub instance_is_self: bool,
    pub healthcheck_name: Option<String>,
    pub healthcheck: Option<Arc<HealthCheck>>,
    pub remote_healthcheck_name: Option<String>,
    pub remote_template: Option<Arc<HealthCheck>>,
    pub if_unhealthy: bool,
    pub never_delete: bool,
    pub hooks: RouteHooks,
}

impl ManageRoutesSpec {
    /// A spec routing `cidr` to `instance` with no checks attached.
    pub fn new(cidr: &str, instance: impl Into<String>) -> Self {
        Self {
            cidr: normalize_cidr(cidr),
            instance: instance.into(),
            instance_is_self: false,
            healthcheck_name: None,
            healthcheck: None,
            remote_healthcheck_name: None,
            remote_template: None,
            if_unhealthy: false,
            never_delete: false,
            hooks: RouteHooks::default(),
        }
    }

    pub fn with_healthcheck(mut self, hc: Arc<HealthCheck>) -> Self {
        self.healthcheck_name = Some(hc.name().to_string());
        self.healthcheck = Some(hc);
        self
    }

    pub fn with_remote_template(mut self, template: Arc<HealthCheck>) -> Self {
        self.remote_healthcheck_name = Some(template.name().to_string());
        self.remote_template = Some(template);
        self
    }

    pub fn if_unhealthy(mut self, value: bool) -> Self {
        self.if_unhealthy = value;
        self
    }

    pub fn never_delete(mut self, value: bool) -> Self {
        self.never_delete = value;
        self
    }

    /// Resolve a configured route for the node `local_instance`.
    ///
    /// `table` is the configuration key of the owning route table entry and
    /// only appears in errors.
    pub fn resolve(
        table: &str,
        config: &ManageRouteConfig,
        local_instance: &str,
        healthchecks: &BTreeMap<String, Arc<HealthCheck>>,
        remote_templates: &BTreeMap<String, Arc<HealthCheck>>,
    ) -> Result<Self, Vec<ValidationError>> {
        let mut errors = Vec::new();

        if config.cidr.is_empty() {
            errors.push(ValidationError::MissingCidr(table.to_string()));
        }
        let cidr = normalize_cidr(&config.cidr);
        if !config.cidr.is_empty() && parse_cidr(&cidr).is_none() {
            errors.push(ValidationError::BadCidr {
                table: table.to_string(),
                cidr: config.cidr.clone(),
            });
        }

        let healthcheck = match &config.healthcheck {
            None => None,
            Some(name) => match healthchecks.get(name) {
                Some(hc) => Some(hc.clone()),
                None => {
                    errors.push(ValidationError::UnknownHealthcheck {
                        table: table.to_string(),
                        cidr: cidr.clone(),
                        name: name.clone(),
                    });
                    None
                }
            },
        };

        let remote_template = match &config.remote_healthcheck {
            None => None,
            Some(name) => match remote_templates.get(name) {
                Some(hc) => Some(hc.clone()),
                None => {
                    errors.push(ValidationError::UnknownRemoteHealthcheck {
                        table: table.to_string(),
                        cidr: cidr.clone(),
                        name: name.clone(),
                    });
                    None
                }
            },
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        let instance_is_self = config.instance.is_empty() || config.instance == SELF_INSTANCE;
        let instance = if instance_is_self {
            local_instance.to_string()
        } else {
            config.instance.clone()
        };

        Ok(Self {
            cidr,
            instance,
            instance_is_self,
            healthcheck_name: config.healthcheck.clone(),
            healthcheck,
            remote_healthcheck_name: config.remote_healthcheck.clone(),
            remote_template,
            if_unhealthy: config.if_unhealthy,
            never_delete: config.never_delete,
            hooks: RouteHooks {
                before_replace: config.run_before_replace_route.clone(),
                after_replace: config.run_after_replace_route.clone(),
                before_delete: config.run_before_delete_route.clone(),
                after_delete: config.run_after_delete_route.clone(),
            },
        })
    }

    /// Local check state as `(healthy, reportable)`, if one is attached.
    pub fn local_status(&self) -> Option<(bool, bool)> {
        self.healthcheck
            .as_ref()
            .map(|hc| (hc.is_healthy(), hc.can_report_yet()))
    }

    /// Copy without healthchecks, for single-pass runs.
    pub fn without_healthchecks(&self) -> Self {
        Self {
            healthcheck: None,
            remote_template: None,
            ..self.clone()
        }
    }
}
