//! Pipeline orchestrator binary.

use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vpipe_db::{DatabaseConfig, PgVideoRepository};
use vpipe_orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorHandler};
use vpipe_queue::{Broker, Consumer};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting vpipe-orchestrator");

    if let Err(e) = run().await {
        error!("Orchestrator error: {:#}", e);
        std::process::exit(1);
    }

    info!("Orchestrator shutdown complete");
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
    let config = OrchestratorConfig::from_env();
    info!("Orchestrator config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let broker = Arc::new(Broker::new(config.broker.clone()).context("failed to create broker")?);
    for queue in config.queues.all() {
        broker
            .ensure_queue(queue, config.broker.queue_max_length, config.broker.dlq_enabled)
            .await
            .with_context(|| format!("failed to declare queue {}", queue))?;
    }

    let db_config = DatabaseConfig::from_env().context("invalid database configuration")?;
    let videos = PgVideoRepository::connect(&db_config)
        .await
        .context("failed to connect to database")?;
    videos.migrate().await.context("failed to run migrations")?;

    let orchestrator = Orchestrator::new(Arc::new(videos), broker.clone(), config.queues.clone());
    let handler = Arc::new(OrchestratorHandler::new(Arc::new(orchestrator), config.retry.clone()));

    let consumer = Arc::new(Consumer::new(
        broker,
        config.queues.orchestrator.clone(),
        config.consumer.clone(),
    ));

    let signal_consumer = Arc::clone(&consumer);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_consumer.shutdown();
    });

    consumer.run(handler).await.context("consumer failed")?;
    Ok(())
}
