//! converged - declarative deployment reconciler
//!
//! Loads a deployment manifest and keeps the declared number of instances
//! running on the configured container runtime.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use converge_daemon::{
    DaemonConfig, DaemonError, DaemonResult, DeploymentManifest, InMemoryRuntime, RuntimeProber,
    Scheduler,
};
use converge_reconciler::Reconciler;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Converge daemon CLI
#[derive(Parser)]
#[command(name = "converged")]
#[command(about = "Converge - declarative deployment reconciler", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CONVERGE_CONFIG")]
    config: Option<String>,

    /// Deployment manifest (YAML or TOML)
    #[arg(short, long, env = "CONVERGE_MANIFEST")]
    manifest: PathBuf,

    /// Override the manifest's replica count
    #[arg(short, long, allow_negative_numbers = true)]
    replicas: Option<i64>,

    /// Log level
    #[arg(long, env = "CONVERGE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "CONVERGE_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let config = DaemonConfig::load(cli.config.as_deref())?;

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let manifest = DeploymentManifest::from_path(&cli.manifest)?;
    let mut spec = manifest.to_spec()?;
    if let Some(replicas) = cli.replicas {
        spec = spec.scaled(replicas)?;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        workload = %spec.name,
        image = %spec.image,
        replicas = spec.replica_count,
        "Starting converged"
    );

    let reconciler = Arc::new(Reconciler::new(spec, config.reconciler.clone())?);
    let runtime = Arc::new(InMemoryRuntime::from_config(&config.runtime));
    let prober = Arc::new(RuntimeProber::new(runtime.clone()));

    let (scheduler, trigger_rx) =
        Scheduler::new(config.scheduler.clone(), reconciler, runtime, prober);

    spawn_event_logger(&scheduler);

    let scheduler_handle = tokio::spawn(scheduler.clone().start(trigger_rx));

    shutdown_signal().await;
    tracing::info!("converged shutting down");

    scheduler.stop();
    scheduler_handle
        .await
        .map_err(|e| DaemonError::Scheduler(e.to_string()))?;

    Ok(())
}

/// Log every reconcile event at debug level.
fn spawn_event_logger(scheduler: &Scheduler) {
    let mut events = scheduler.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => match serde_json::to_string(&envelope) {
                    Ok(json) => tracing::debug!(event = %json, "Reconcile event"),
                    Err(e) => tracing::warn!(error = %e, "Could not encode event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
