use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use promscaler::autoscaler::{Reconciler, RECONCILE_INTERVAL_SECS};
use promscaler::clients::{ClusterConfig, KubeClient, PrometheusClient};

/// Custom horizontal autoscaler driven by Prometheus metrics
#[derive(Parser, Debug)]
#[command(name = "promscaler", version, about)]
struct Cli {
    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a kubeconfig file (falls back to in-cluster config, then
    /// ~/.kube/config)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Namespace the AutoscalingDefinition objects are listed from
    #[arg(long, default_value = "default")]
    namespace: String,

    /// Seconds between reconcile passes over the definition store
    #[arg(long, default_value_t = RECONCILE_INTERVAL_SECS)]
    reconcile_interval: u64,

    /// Optional .env file to load before starting
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    // Cluster access is the one fatal requirement
    let cluster_config = match ClusterConfig::load(cli.kubeconfig.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load cluster configuration: {}", e);
            process::exit(1);
        }
    };
    let kube_client = match KubeClient::new(cluster_config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create API client: {}", e);
            process::exit(1);
        }
    };
    let backend = Arc::new(PrometheusClient::new());

    let reconciler = Reconciler::new(
        kube_client.clone(),
        backend,
        kube_client,
        cli.namespace.clone(),
    )
    .with_interval(Duration::from_secs(cli.reconcile_interval));

    info!(
        "Starting promscaler: namespace={}, reconcile every {}s",
        cli.namespace, cli.reconcile_interval
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconcile_task = tokio::spawn(reconciler.run(shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Received shutdown signal, stopping pipelines");
    let _ = shutdown_tx.send(true);
    let _ = reconcile_task.await;
}
