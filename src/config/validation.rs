//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing healthchecks)
//! - Check every probe's parameters against its registered kind
//! - Compile every finder tree once to surface regex and CIDR errors
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AnycastConfig → Result<(), Vec<ValidationError>>
//! - Runs after defaults are applied and before config is accepted

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{AnycastConfig, ManageRouteConfig};
use crate::health::{validate_healthcheck, HealthError, ProbeRegistry};
use crate::routing::cidr::parse_cidr;
use crate::routing::FindError;

/// One configuration defect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("No route_tables defined in config")]
    NoRouteTables,

    #[error("No manage_routes key in route table '{0}'")]
    NoManagedRoutes(String),

    #[error("Route table '{table}' finder: {source}")]
    Finder {
        table: String,
        #[source]
        source: FindError,
    },

    #[error(transparent)]
    HealthCheck(#[from] HealthError),

    #[error("cidr is not defined in {0}")]
    MissingCidr(String),

    #[error("Could not parse cidr '{cidr}' in {table}")]
    BadCidr { table: String, cidr: String },

    #[error("Route tables {table}, route {cidr} cannot find healthcheck '{name}'")]
    UnknownHealthcheck {
        table: String,
        cidr: String,
        name: String,
    },

    #[error("Route table {table}, route {cidr} cannot find remote healthcheck '{name}'")]
    UnknownRemoteHealthcheck {
        table: String,
        cidr: String,
        name: String,
    },

    #[error("Invalid metrics address '{0}'")]
    BadMetricsAddress(String),
}

/// Validate a configuration with defaults already applied.
pub fn validate_config(
    config: &AnycastConfig,
    registry: &ProbeRegistry,
) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (name, hc) in &config.healthchecks {
        errors.extend(
            validate_healthcheck(name, hc, false, registry)
                .into_iter()
                .map(ValidationError::from),
        );
    }
    for (name, hc) in &config.remote_healthchecks {
        errors.extend(
            validate_healthcheck(name, hc, true, registry)
                .into_iter()
                .map(ValidationError::from),
        );
    }

    if config.route_tables.is_empty() {
        errors.push(ValidationError::NoRouteTables);
    }

    for (name, table) in &config.route_tables {
        if let Err(find_errors) = table.find.build_filter() {
            errors.extend(find_errors.into_iter().map(|source| ValidationError::Finder {
                table: name.clone(),
                source,
            }));
        }

        if table.manage_routes.is_empty() {
            errors.push(ValidationError::NoManagedRoutes(name.clone()));
        }

        for route in &table.manage_routes {
            errors.extend(validate_route(name, route, config));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::BadMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Checks for one managed route; healthcheck names resolve against `config`.
pub fn validate_route(
    table: &str,
    route: &ManageRouteConfig,
    config: &AnycastConfig,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if route.cidr.is_empty() {
        errors.push(ValidationError::MissingCidr(table.to_string()));
    } else if parse_cidr(&route.cidr).is_none() {
        errors.push(ValidationError::BadCidr {
            table: table.to_string(),
            cidr: route.cidr.clone(),
        });
    }

    if let Some(name) = &route.healthcheck {
        if !config.healthchecks.contains_key(name) {
            errors.push(ValidationError::UnknownHealthcheck {
                table: table.to_string(),
                cidr: route.cidr.clone(),
                name: name.clone(),
            });
        }
    }

    if let Some(name) = &route.remote_healthcheck {
        if !config.remote_healthchecks.contains_key(name) {
            errors.push(ValidationError::UnknownRemoteHealthcheck {
                table: table.to_string(),
                cidr: route.cidr.clone(),
                name: name.clone(),
            });
        }
    }

    errors
}
