//! Active healthchecks.
//!
//! # Responsibilities
//! - Validate healthcheck configuration
//! - Resolve the probe kind and run it periodically in the background
//! - Feed results into the debounce state and fan transitions out
//! - Produce fresh copies bound to a new destination

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::schema::HealthCheckConfig;
use crate::health::listeners::{Listeners, Subscription};
use crate::health::probes::{ProbeError, ProbeRegistry, Prober};
use crate::health::state::HealthState;
use crate::hooks;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Healthcheck configuration and setup errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("No healthcheck type set")]
    NoType,

    #[error("Remote healthcheck {0} cannot have destination set")]
    RemoteHasDestination(String),

    #[error("Healthcheck {0} has no destination set")]
    NoDestination(String),

    #[error("Healthcheck {name} destination '{destination}' does not parse as an IP address")]
    BadDestination { name: String, destination: String },

    #[error("Healthcheck type '{0}' not found in the healthcheck registry")]
    UnknownType(String),

    #[error("Healthcheck {name}: {source}")]
    Probe {
        name: String,
        #[source]
        source: ProbeError,
    },
}

/// Check a healthcheck definition. Returns every problem found.
///
/// Templates (`remote = true`) must not carry a destination; their probe
/// parameters are checked against a placeholder address instead.
pub fn validate_healthcheck(
    name: &str,
    config: &HealthCheckConfig,
    remote: bool,
    registry: &ProbeRegistry,
) -> Vec<HealthError> {
    let mut errors = Vec::new();

    if config.kind.is_empty() {
        errors.push(HealthError::NoType);
    }

    let destination = match (&config.destination, remote) {
        (Some(_), true) => {
            errors.push(HealthError::RemoteHasDestination(name.to_string()));
            None
        }
        (None, true) => Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        (None, false) => {
            errors.push(HealthError::NoDestination(name.to_string()));
            None
        }
        (Some(dest), false) => match dest.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                errors.push(HealthError::BadDestination {
                    name: name.to_string(),
                    destination: dest.clone(),
                });
                None
            }
        },
    };

    if !config.kind.is_empty() {
        let ip = destination.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        match registry.build(&config.kind, ip, &config.config) {
            None => errors.push(HealthError::UnknownType(config.kind.clone())),
            Some(Err(source)) => errors.push(HealthError::Probe {
                name: name.to_string(),
                source,
            }),
            Some(Ok(_)) => {}
        }
    }

    errors
}

struct Runner {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

/// A named, periodically probed healthcheck.
pub struct HealthCheck {
    name: String,
    config: HealthCheckConfig,
    destination: Option<IpAddr>,
    prober: OnceLock<Arc<dyn Prober>>,
    state: Mutex<HealthState>,
    listeners: Listeners,
    runner: Mutex<Option<Runner>>,
}

impl std::fmt::Debug for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheck")
            .field("name", &self.name)
            .field("kind", &self.config.kind)
            .field("destination", &self.destination)
            .field("healthy", &self.is_healthy())
            .field("run_count", &self.run_count())
            .finish()
    }
}

impl HealthCheck {
    /// Build from configuration. Zero-valued tunables get their defaults.
    pub fn from_config(name: impl Into<String>, config: &HealthCheckConfig) -> Result<Self, HealthError> {
        let name = name.into();
        let mut config = config.clone();
        config.apply_defaults();

        let destination = match &config.destination {
            None => None,
            Some(dest) => Some(dest.parse::<IpAddr>().map_err(|_| HealthError::BadDestination {
                name: name.clone(),
                destination: dest.clone(),
            })?),
        };

        Ok(Self {
            state: Mutex::new(HealthState::new(config.rise, config.fall)),
            name,
            config,
            destination,
            prober: OnceLock::new(),
            listeners: Listeners::new(),
            runner: Mutex::new(None),
        })
    }

    /// Resolve the probe implementation. Calling it again is a no-op.
    pub fn setup(&self, registry: &ProbeRegistry) -> Result<(), HealthError> {
        if self.prober.get().is_some() {
            return Ok(());
        }
        let destination = self
            .destination
            .ok_or_else(|| HealthError::NoDestination(self.name.clone()))?;
        let prober = registry
            .build(&self.config.kind, destination, &self.config.config)
            .ok_or_else(|| HealthError::UnknownType(self.config.kind.clone()))?
            .map_err(|source| HealthError::Probe {
                name: self.name.clone(),
                source,
            })?;
        let _ = self.prober.set(Arc::from(prober));
        Ok(())
    }

    /// A set-up copy aimed at `destination` with fresh history.
    pub fn new_with_destination(
        &self,
        destination: IpAddr,
        registry: &ProbeRegistry,
    ) -> Result<Arc<HealthCheck>, HealthError> {
        let mut config = self.config.clone();
        config.destination = Some(destination.to_string());
        let hc = HealthCheck::from_config(self.name.clone(), &config)?;
        hc.setup(registry)?;
        Ok(Arc::new(hc))
    }

    /// Run the probe once and update state.
    ///
    /// # Panics
    ///
    /// Panics if [`HealthCheck::setup`] has not succeeded.
    pub async fn perform_healthcheck(&self) -> bool {
        let Some(prober) = self.prober.get().cloned() else {
            panic!("setup() never called for healthcheck {} before run", self.name);
        };

        let timeout = Duration::from_secs(self.config.timeout_secs);
        let result = match time::timeout(timeout, prober.probe()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    healthcheck = %self.name,
                    destination = %self.destination_label(),
                    timeout_secs = self.config.timeout_secs,
                    "Healthcheck probe timed out"
                );
                false
            }
        };

        let (transition, run_count) = {
            let mut state = self.state.lock().expect("health state mutex poisoned");
            (state.record(result), state.run_count())
        };

        metrics::record_healthcheck_run(&self.name);
        tracing::trace!(
            healthcheck = %self.name,
            destination = %self.destination_label(),
            result,
            run_count,
            "Healthcheck ran"
        );

        if let Some(healthy) = transition {
            self.on_transition(healthy);
        }

        result
    }

    fn on_transition(&self, healthy: bool) {
        let destination = self.destination_label();
        if healthy {
            tracing::info!(healthcheck = %self.name, destination = %destination, kind = %self.config.kind, "Healthcheck is healthy");
        } else {
            tracing::warn!(healthcheck = %self.name, destination = %destination, kind = %self.config.kind, "Healthcheck is unhealthy");
        }
        metrics::record_healthcheck_status(&self.name, &destination, healthy);

        let hook = if healthy {
            &self.config.run_on_healthy
        } else {
            &self.config.run_on_unhealthy
        };
        let label = if healthy { "run_on_healthy" } else { "run_on_unhealthy" };
        hooks::spawn_hook(label, hook.clone(), hooks::DEFAULT_HOOK_TIMEOUT);

        self.listeners.publish(healthy);
    }

    /// Start the background prober. No-op while already running.
    ///
    /// The first probe fires immediately, then every `every_secs`.
    pub fn run(self: &Arc<Self>) {
        if self.prober.get().is_none() {
            panic!("setup() never called for healthcheck {} before run", self.name);
        }

        let mut runner = self.runner.lock().expect("runner mutex poisoned");
        if runner.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return;
        }

        let shutdown = Shutdown::new();
        let mut stop_rx = shutdown.subscribe();
        let weak: Weak<HealthCheck> = Arc::downgrade(self);
        let every = Duration::from_secs(self.config.every_secs);

        tracing::debug!(
            healthcheck = %self.name,
            destination = %self.destination_label(),
            every_secs = self.config.every_secs,
            "Healthcheck starting"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(hc) = weak.upgrade() else { break };
                        hc.perform_healthcheck().await;
                    }
                    _ = stop_rx.recv() => break,
                }
            }
        });

        *runner = Some(Runner { shutdown, handle });
    }

    /// Stop the background prober. Safe to call repeatedly or before `run`.
    pub fn stop(&self) {
        let runner = self.runner.lock().expect("runner mutex poisoned").take();
        if let Some(runner) = runner {
            runner.shutdown.trigger();
            runner.handle.abort();
            tracing::debug!(
                healthcheck = %self.name,
                destination = %self.destination_label(),
                "Healthcheck stopped"
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.runner
            .lock()
            .expect("runner mutex poisoned")
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Subscribe to status transitions.
    pub fn subscribe(&self) -> Subscription {
        self.listeners.subscribe()
    }

    pub fn unsubscribe(&self, id: u64) {
        self.listeners.unsubscribe(id);
    }

    pub fn is_healthy(&self) -> bool {
        self.state.lock().expect("health state mutex poisoned").is_healthy()
    }

    pub fn can_report_yet(&self) -> bool {
        self.state.lock().expect("health state mutex poisoned").can_report_yet()
    }

    pub fn run_count(&self) -> u64 {
        self.state.lock().expect("health state mutex poisoned").run_count()
    }

    pub fn history(&self) -> Vec<bool> {
        self.state.lock().expect("health state mutex poisoned").history()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn destination(&self) -> Option<IpAddr> {
        self.destination
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    fn destination_label(&self) -> String {
        self.destination
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

impl Drop for HealthCheck {
    fn drop(&mut self) {
        if let Ok(runner) = self.runner.get_mut() {
            if let Some(runner) = runner.take() {
                runner.shutdown.trigger();
                runner.handle.abort();
            }
        }
    }
}
