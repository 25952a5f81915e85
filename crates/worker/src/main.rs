use std::sync::Arc;

use anyhow::Context;
use bridge_core::clock::SystemClock;
use bridge_worker::config::WorkerConfig;
use bridge_worker::orchestrator::JobOrchestrator;
use bridge_worker::runtime::{read_job, write_result};
use bridge_worker::storage::{ObjectStore, S3ObjectStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries the job result only.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bridge_worker=info,bridge_comfyui=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Arc::new(WorkerConfig::from_env());
    tracing::info!(
        api_url = %config.api_url(),
        job_input = %config.job_input_path,
        staging = ?config.input_staging,
        output_missing = ?config.output_missing,
        "Worker starting",
    );

    let job = read_job(&config.job_input_path)
        .await
        .context("Could not load job")?;

    let store = match &config.bucket {
        Some(bucket) => {
            let s3 = S3ObjectStore::from_config(bucket).await;
            Some(Arc::new(s3) as Arc<dyn ObjectStore>)
        }
        None => None,
    };

    let orchestrator = JobOrchestrator::new(config, Arc::new(SystemClock::new()), store);
    let result = orchestrator.handle(&job).await;

    write_result(std::io::stdout().lock(), &result).context("Failed to write job result")?;
    Ok(())
}
