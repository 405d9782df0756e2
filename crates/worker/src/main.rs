use anyhow::{Context, Result};
use baton_core::telemetry::{init_telemetry, TelemetryConfig};
use baton_worker::{run_timer_ticker, Collaborators, ProgressionWorker, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; real environment variables still apply
    let _ = dotenvy::dotenv();

    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "baton" {
        telemetry_config.service_name = "baton-worker".to_string();
    }
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some("baton_worker=info,baton_durable=info".to_string());
    }
    init_telemetry(telemetry_config);

    let config = WorkerConfig::from_env();
    tracing::info!(
        worker_id = %config.worker_id,
        batch_size = config.poller.batch_size,
        timer_tick_ms = config.timer_tick.as_millis(),
        ack_timeout = ?config.deadlines.ack_timeout,
        task_timeout = ?config.deadlines.timeout,
        "baton-worker starting..."
    );

    let (collaborators, _broker, timers) = Collaborators::in_memory();
    let timer_tick = config.timer_tick;
    let worker = ProgressionWorker::new(config, collaborators);

    if let Some(workflow_id) = worker
        .start_configured_workflow()
        .await
        .context("Failed to start configured workflow")?
    {
        tracing::info!(%workflow_id, "Started configured workflow");
    }

    let ticker = tokio::spawn(run_timer_ticker(timers, timer_tick, worker.shutdown_signal()));

    // Blocks until ctrl-c, then waits for every loop to finish its batch
    let result = worker
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Received shutdown signal");
        })
        .await;
    worker.shutdown();

    ticker.await.context("Timer ticker panicked")?;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Worker error");
    }
    tracing::info!("Worker shutdown complete");
    result
}
