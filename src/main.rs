//! Health Monitor Binary

use clap::Parser;
use health_monitor::config::DEFAULT_CONFIG_PATH;
use health_monitor::{Config, ControlLoop, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "health_monitor", version, about = "HTTP health checks with alerting and automated restarts")]
struct Args {
    /// Path to the YAML monitor configuration
    #[arg(long, env = "MONITOR_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Run a single round of checks, print the status report and exit
    #[arg(long)]
    once: bool,

    /// Log restarts instead of driving the container runtime
    #[arg(long, env = "REMEDIATION_DRY_RUN")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    initialize_tracing();

    let args = Args::parse();

    info!("Starting health monitor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = Config::from_sources(&args.config);
    if args.dry_run {
        config.remediation.dry_run = true;
    }

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    info!(
        "Monitor configuration - Targets: {}, Failure threshold: {}, Response threshold: {}ms, Remediation: {}",
        config.targets.len(),
        config.thresholds.consecutive_failures,
        config.thresholds.response_time_ms,
        config.remediation.enabled
    );

    let mut control = ControlLoop::from_config(config)?;

    if args.once {
        let report = control.run_tick().await;
        control.log_status().await;
        println!("{}", serde_json::to_string_pretty(&control.status().await)?);
        if !report.all_healthy() {
            std::process::exit(2);
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, finishing current checks");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Keep the sender alive; dropping it stops the loop
                error!("Failed to wait for shutdown signal: {}", e);
                let _keep = shutdown_tx;
                futures::future::pending::<()>().await;
            }
        }
    });

    control.run(shutdown_rx).await;

    Ok(())
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
