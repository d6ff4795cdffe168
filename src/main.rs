//! IP Rotator - Entry Point
//!
//! Provisions the gateway pool, serves the local listener until Ctrl+C or
//! SIGTERM, then deletes the pool. `ip-rotator sweep` only deletes gateways
//! left behind for the configured site.

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ip_rotator::config::LogConfig;
use ip_rotator::gateway::ShutdownReport;
use ip_rotator::{Config, RotatorServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config.log);

    info!("Starting IP Rotator for {}", config.rotator.site);

    let rotator = config
        .rotator_builder()
        .build()
        .context("Failed to build rotator")?;

    if std::env::args().nth(1).as_deref() == Some("sweep") {
        let report = rotator.sweep().await;
        log_report("Sweep", &report);
        return Ok(());
    }

    let lease = rotator
        .acquire(config.rotator.force)
        .await
        .context("Failed to start gateways")?;
    info!(
        "Gateways ready in {} of {} regions",
        lease.ready_set().len(),
        lease.regions().len()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = RotatorServer::new(config.server.clone(), lease.rotator().clone());
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run(shutdown_rx).await {
            error!("Listener error: {}", e);
        }
    });

    info!("Listener started on {}", config.server_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = server_task.await;

    let report = lease.release().await;
    log_report("Shutdown", &report);

    info!("IP Rotator stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("ip_rotator={}", log.level).into());

    if log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn log_report(action: &str, report: &ShutdownReport) {
    info!(
        deleted = report.deleted.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "{} complete",
        action
    );
    for id in &report.skipped {
        warn!(gateway_id = %id, "Gateway kept, delete it manually");
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
