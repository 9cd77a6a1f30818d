// Cashbacks - Web Server
// REST API with Axum plus the periodic job tick

use anyhow::{Context, Result};
use cashbacks::api::{router, AppState};
use cashbacks::{open_database, telemetry, AppConfig, CashbackService, JobOutcome};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    telemetry::init(&config.telemetry).context("failed to initialise logging")?;

    let conn = open_database(&config.database_path)
        .with_context(|| format!("failed to open database at {}", config.database_path.display()))?;
    info!(path = %config.database_path.display(), "database ready");

    let service = CashbackService::new(conn);
    let state = AppState::new(service, config.update_url.clone());

    spawn_job_tick(Arc::clone(&state.scheduler), config.job_tick);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!(%addr, "server listening");
    println!("Server running on http://{}", addr);
    println!("   API: http://{}/api/cashbacks", addr);
    println!("   Press Ctrl+C to stop");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

/// Run due jobs on startup and then every `period`.
fn spawn_job_tick(scheduler: Arc<cashbacks::JobScheduler>, period: std::time::Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let scheduler = Arc::clone(&scheduler);
            match tokio::task::spawn_blocking(move || scheduler.run_due(Utc::now())).await {
                Ok(report) => {
                    for (job, outcome) in &report.entries {
                        match outcome {
                            JobOutcome::Failed(err) => warn!(job = job.name(), error = %err, "job failed"),
                            JobOutcome::Completed(summary) => info!(job = job.name(), %summary, "job finished"),
                            _ => {}
                        }
                    }
                }
                Err(err) => warn!(error = %err, "job tick panicked"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl+C");
    }
}
