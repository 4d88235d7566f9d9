mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use micrograph_db::{PgBalanceLedger, PgExperimentGroupStore};
use micrograph_pipeline::{ArchiveAssembler, PipelineConfig, ReconciliationLoop};
use micrograph_runpod::{RunPodApi, RunPodConfig};
use micrograph_storage::{S3Config, S3ObjectStore};

use config::{LogFormat, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json = config::log_format_from_env() == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "micrograph_worker=debug,micrograph_pipeline=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let worker_config = WorkerConfig::from_env()?;
    let pipeline_config = PipelineConfig::from_env();
    let runpod_config = RunPodConfig::from_env();
    let s3_config = S3Config::from_env();
    tracing::info!(
        input_bucket = %pipeline_config.input_bucket,
        output_bucket = %pipeline_config.output_bucket,
        prefix = %pipeline_config.layout.prefix(),
        usage_cost = ?pipeline_config.usage_cost,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = micrograph_db::create_pool(&worker_config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    micrograph_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    micrograph_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Collaborators ---
    let objects = Arc::new(S3ObjectStore::connect(&s3_config).await);
    let inference =
        Arc::new(RunPodApi::new(&runpod_config).context("Failed to build inference client")?);
    let groups = Arc::new(PgExperimentGroupStore::new(pool.clone()));
    let ledger = Arc::new(PgBalanceLedger::new(pool.clone()));

    let assembler = ArchiveAssembler::new(
        objects,
        pipeline_config.output_bucket.clone(),
        pipeline_config.layout.clone(),
        pipeline_config.archive.clone(),
    );

    let reconciler = ReconciliationLoop::new(
        inference,
        groups,
        ledger,
        assembler,
        pipeline_config.job_template(),
        pipeline_config.usage_cost,
        pipeline_config.reconcile_interval,
        pipeline_config.scan_timeout,
    );

    // --- Reconciliation loop ---
    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let loop_handle = tokio::spawn(async move {
        reconciler.run(loop_cancel).await;
    });
    tracing::info!("Worker started");

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    match tokio::time::timeout(worker_config.shutdown_timeout, loop_handle).await {
        Ok(Ok(())) => tracing::info!("Reconciliation loop stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "Reconciliation loop task failed"),
        Err(_) => tracing::warn!(
            timeout_secs = worker_config.shutdown_timeout.as_secs(),
            "Reconciliation loop did not stop in time, exiting anyway",
        ),
    }

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the worker
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
