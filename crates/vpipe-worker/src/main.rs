//! Stage worker binary.

use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vpipe_db::{DatabaseConfig, PgVideoRepository};
use vpipe_media::service_for_stage;
use vpipe_queue::{Broker, Consumer};
use vpipe_storage::S3Storage;
use vpipe_worker::{QueueNotifier, StageHandler, StageWorker, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting vpipe-worker");

    if let Err(e) = run().await {
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "vpipe=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let broker = Arc::new(Broker::new(config.broker.clone()).context("failed to create broker")?);
    for queue in [config.queue(), config.queues.orchestrator.as_str()] {
        broker
            .ensure_queue(queue, config.broker.queue_max_length, config.broker.dlq_enabled)
            .await
            .with_context(|| format!("failed to declare queue {}", queue))?;
    }

    let db_config = DatabaseConfig::from_env().context("invalid database configuration")?;
    let videos = PgVideoRepository::connect(&db_config)
        .await
        .context("failed to connect to database")?;

    let storage = S3Storage::from_env().context("failed to create storage client")?;
    let processor = service_for_stage(config.stage, &config.media);
    let notifier = QueueNotifier::new(broker.clone(), config.queues.orchestrator.clone());

    let worker = StageWorker::new(
        config.stage,
        Arc::new(videos),
        Arc::new(storage),
        processor,
        Arc::new(notifier),
    )
    .with_buckets(config.input_bucket.clone(), config.output_bucket.clone());
    let handler = Arc::new(StageHandler::new(Arc::new(worker), config.retry.clone()));

    let consumer = Arc::new(Consumer::new(broker, config.queue(), config.consumer.clone()));

    let signal_consumer = Arc::clone(&consumer);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_consumer.shutdown();
    });

    consumer.run(handler).await.context("consumer failed")?;
    Ok(())
}
