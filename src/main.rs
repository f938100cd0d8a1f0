//! Anycast failover router
//!
//! Keeps cloud route-table entries for a CIDR pointed at a healthy instance,
//! using active health probes instead of a routing protocol. Every candidate
//! node runs the same reconciliation; the shared route tables converge.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                         ANYCAST ROUTER                           │
//!   │                                                                  │
//!   │  ┌─────────┐   poll_time_secs   ┌─────────┐    ┌─────────────┐   │
//!   │  │ daemon  │───────────────────▶│ routing │───▶│  reconcile  │───┼──▶ RoutingApi
//!   │  │  loop   │  list_route_tables │ filters │    │  decisions  │   │   (EC2 / memory)
//!   │  └─────────┘                    └─────────┘    └──────▲──────┘   │
//!   │                                                       │          │
//!   │  ┌──────────────────────┐   status transitions        │          │
//!   │  │ health (local checks)│─────────────────────────────┤          │
//!   │  └──────────────────────┘                             │          │
//!   │  ┌──────────────────────┐                             │          │
//!   │  │ remote probes on the │─────────────────────────────┘          │
//!   │  │ current route owner  │                                        │
//!   │  └──────────────────────┘                                        │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use anycast_router::cloud::{InMemoryRoutingApi, NodeIdentity, RoutingApi};
use anycast_router::config::{load_config, NodeConfig};
use anycast_router::health::ProbeRegistry;
use anycast_router::lifecycle::signals;
use anycast_router::observability::{logging, metrics};
use anycast_router::{Daemon, DaemonOptions, Shutdown};

#[derive(Parser)]
#[command(name = "anycast-router")]
#[command(about = "Healthcheck-driven failover of cloud route-table entries", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short = 'f', long, default_value = "/etc/anycast-router.toml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Run one reconciliation cycle without healthchecks, then exit
    #[arg(long)]
    oneshot: bool,

    /// Send every routing call as a dry run
    #[arg(long)]
    noop: bool,

    /// Route-table snapshot to run against instead of the cloud API
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn identity_from_config(node: &NodeConfig) -> Result<NodeIdentity, Box<dyn std::error::Error>> {
    let instance_id = node
        .instance_id
        .clone()
        .ok_or("node.instance_id must be set when running against a snapshot")?;
    let private_ip = node
        .private_ip
        .ok_or("node.private_ip must be set when running against a snapshot")?;
    Ok(NodeIdentity {
        instance_id,
        private_ip,
        subnet_id: node.subnet_id.clone(),
        region: node.region.clone(),
    })
}

#[cfg(feature = "aws")]
async fn cloud_backend(
    node: &NodeConfig,
) -> Result<(Arc<dyn RoutingApi>, NodeIdentity), Box<dyn std::error::Error>> {
    use anycast_router::cloud::ec2::{node_identity_from_metadata, Ec2RoutingApi};

    let identity = node_identity_from_metadata(node).await?;
    let api = Ec2RoutingApi::new(identity.region.clone()).await;
    Ok((Arc::new(api), identity))
}

#[cfg(not(feature = "aws"))]
async fn cloud_backend(
    _node: &NodeConfig,
) -> Result<(Arc<dyn RoutingApi>, NodeIdentity), Box<dyn std::error::Error>> {
    Err("built without the `aws` feature; pass --snapshot to run against a snapshot file".into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let registry = ProbeRegistry::with_builtins();
    let config = load_config(&cli.config, &registry)?;

    let level = if cli.debug {
        "debug"
    } else {
        config.observability.log_level.as_str()
    };
    logging::init_logging(level, config.observability.log_format);

    tracing::info!(
        config = %cli.config.display(),
        route_tables = config.route_tables.len(),
        healthchecks = config.healthchecks.len(),
        poll_time_secs = config.poll_time_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let (api, node): (Arc<dyn RoutingApi>, NodeIdentity) = match &cli.snapshot {
        Some(path) => {
            let api = InMemoryRoutingApi::load(path)?;
            tracing::info!(snapshot = %path.display(), "Using route-table snapshot");
            (Arc::new(api), identity_from_config(&config.node)?)
        }
        None => cloud_backend(&config.node).await?,
    };

    let options = DaemonOptions {
        oneshot: cli.oneshot,
        noop: cli.noop,
    };
    let daemon = Daemon::new(&config, api, node, registry, options)?;

    let shutdown = Shutdown::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        signals::shutdown_on_signal(&signal_shutdown).await;
    });

    daemon.run(shutdown).await?;
    Ok(())
}
