//! musterd — the muster daemon.
//!
//! Federates a fleet of container engines behind a single endpoint: watches
//! discovery for membership, opens one session per engine, and schedules
//! container requests across the fleet.
//!
//! # Usage
//!
//! ```text
//! musterd --discovery nodes://10.0.0.1:2375,10.0.0.2:2375
//! musterd --discovery etcd://coordination:2379/muster/nodes --strategy binpack
//! musterd --discovery file:///etc/muster/cluster --fail-fast
//! ```
//!
//! Exit codes: 0 graceful stop, 1 configuration error, 2 discovery
//! unavailable, 3 no engine reachable at startup with `--fail-fast`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};

use muster_cluster::{ClientFactory, Cluster, ClusterOptions, ClusterResult};
use muster_discovery::backend_for_uri;
use muster_engine::docker::DockerEngine;
use muster_engine::{EngineClient, EngineOptions};
use muster_scheduler::Scheduler;
use muster_store::PlacementStore;

const EXIT_CONFIG: i32 = 1;
const EXIT_DISCOVERY: i32 = 2;
const EXIT_NO_ENGINE: i32 = 3;

#[derive(Parser)]
#[command(name = "musterd", about = "Cluster manager federating container engines")]
struct Cli {
    /// Discovery URI: nodes://a:2375,b:2375 | file:///path | etcd://h:2379/prefix
    /// | zk://... | consul://... (a bare host:port list implies nodes://).
    #[arg(long)]
    discovery: String,

    /// Placement strategy: spread, binpack, or random.
    #[arg(long, default_value = "spread")]
    strategy: String,

    /// Comma-separated filter chain, applied in order.
    #[arg(long, default_value = "health,port,dependency,constraint,affinity,slots")]
    filters: String,

    /// Engine refresh interval in seconds; discovery polls at the same pace.
    #[arg(long, default_value = "25")]
    heartbeat: u64,

    /// Resource overcommit ratio (0.05 = 5% above declared capacity).
    #[arg(long, default_value = "0.05")]
    overcommit: f64,

    /// Engine dial timeout in seconds.
    #[arg(long, default_value = "10")]
    dial_timeout: u64,

    /// Per-call refresh timeout in seconds.
    #[arg(long, default_value = "30")]
    refresh_timeout: u64,

    /// Data directory for the placement store.
    #[arg(long, default_value = "/var/lib/muster")]
    data_dir: PathBuf,

    /// Exit instead of waiting when no engine is reachable at startup.
    #[arg(long)]
    fail_fast: bool,
}

/// Dials engines over the Docker wire protocol.
struct DockerClientFactory {
    timeout_secs: u64,
}

impl ClientFactory for DockerClientFactory {
    fn client_for(&self, addr: &str) -> ClusterResult<Arc<dyn EngineClient>> {
        let client = DockerEngine::connect(addr, self.timeout_secs)?;
        Ok(Arc::new(client))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,musterd=debug,muster=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let heartbeat = Duration::from_secs(cli.heartbeat);

    // ── Configuration ──────────────────────────────────────────────

    let filter_names: Vec<&str> = cli
        .filters
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let scheduler = match Scheduler::with_names(&cli.strategy, &filter_names, cli.overcommit) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "invalid scheduler configuration");
            std::process::exit(EXIT_CONFIG);
        }
    };

    let backend = match backend_for_uri(&cli.discovery, heartbeat) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, uri = %cli.discovery, "invalid discovery configuration");
            std::process::exit(EXIT_CONFIG);
        }
    };
    info!(backend = backend.name(), uri = %cli.discovery, "discovery configured");

    if let Err(e) = std::fs::create_dir_all(&cli.data_dir) {
        error!(error = %e, path = ?cli.data_dir, "cannot create data directory");
        std::process::exit(EXIT_CONFIG);
    }
    let store = match PlacementStore::open(&cli.data_dir.join("placements.redb")) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot open placement store");
            std::process::exit(EXIT_CONFIG);
        }
    };

    // ── Discovery ──────────────────────────────────────────────────

    let (discovery_shutdown_tx, discovery_shutdown_rx) = tokio::sync::watch::channel(false);
    let mut channels = match backend.watch(discovery_shutdown_rx).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "discovery watch failed");
            std::process::exit(EXIT_DISCOVERY);
        }
    };

    // The first full membership set must arrive before the fleet exists.
    let first_wait = heartbeat.max(Duration::from_secs(10));
    let initial = match tokio::time::timeout(first_wait, channels.entries.recv()).await {
        Ok(Some(entries)) => entries,
        Ok(None) | Err(_) => {
            error!(uri = %cli.discovery, "discovery produced no membership");
            std::process::exit(EXIT_DISCOVERY);
        }
    };
    info!(engines = initial.len(), "initial membership received");

    // Surface backend errors without tearing the daemon down.
    let mut discovery_errors = channels.errors;
    tokio::spawn(async move {
        while let Some(e) = discovery_errors.recv().await {
            warn!(error = %e, "discovery backend error");
        }
    });

    // ── Cluster ────────────────────────────────────────────────────

    let options = ClusterOptions {
        engine: EngineOptions {
            heartbeat,
            refresh_timeout: Duration::from_secs(cli.refresh_timeout),
            overcommit_ratio: cli.overcommit,
            ..EngineOptions::default()
        },
        dial_timeout: Duration::from_secs(cli.dial_timeout),
        ..ClusterOptions::default()
    };
    let factory = Arc::new(DockerClientFactory {
        timeout_secs: cli.dial_timeout,
    });
    let cluster = Cluster::new(options, scheduler, store, factory);

    cluster.apply_membership(initial).await;
    let healthy = cluster.healthy_engine_count().await;
    if healthy == 0 {
        if cli.fail_fast {
            error!("no engine reachable at startup");
            std::process::exit(EXIT_NO_ENGINE);
        }
        warn!("no engine reachable yet, waiting for the fleet");
    } else {
        info!(healthy, "fleet connected");
    }

    cluster.start(channels.entries).await;
    info!("musterd running");

    // ── Shutdown ───────────────────────────────────────────────────

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install CTRL+C handler");
    }
    info!("shutdown signal received");
    let _ = discovery_shutdown_tx.send(true);
    cluster.stop().await;
    info!("musterd stopped");
}
