//! Consume intake topics, validate requests and samples, and publish them to downstream topics.
use std::sync::Arc;

use envconfig::Envconfig;
use filter_common::audit::{AuditSink, FileAuditSink, TracingAuditSink};
use filter_common::health::HealthRegistry;
use filter_common::metrics::{serve, setup_metrics_recorder, setup_ops_router};
use filter_common::transport::KafkaTransport;
use request_filter::config::Config;
use request_filter::service::FilterService;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    let readiness = HealthRegistry::new("readiness");
    let recorder = setup_metrics_recorder().expect("failed to install metrics recorder");

    let kafka_liveness = liveness.register(
        "rdkafka",
        time::Duration::try_from(config.liveness_deadline.0).unwrap_or(time::Duration::seconds(30)),
    );
    let transport = Arc::new(
        KafkaTransport::connect(config.kafka.clone(), kafka_liveness)
            .await
            .expect("failed to connect to Kafka"),
    );

    let audit: Arc<dyn AuditSink> = match &config.request_logger_filepath {
        Some(path) => {
            info!("writing audit trail to {}", path.as_str());
            Arc::new(FileAuditSink::new(path.as_str()))
        }
        None => Arc::new(TracingAuditSink),
    };

    let service = FilterService::new(
        &config,
        transport.clone(),
        audit,
        &liveness,
        &readiness,
    );
    service
        .initialize()
        .await
        .expect("failed to start pipelines");

    let bind = config.bind();
    let router = setup_ops_router(recorder, liveness, readiness);
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    shutdown_signal().await;

    // Stop feeding the queues first, then drain them, then wait for pending produce requests.
    transport.shutdown().await;
    if let Err(err) = service.shutdown().await {
        error!("failed to drain pipelines: {}", err);
    }
    if let Err(err) = transport.flush(config.flush_timeout.0) {
        error!("failed to flush Kafka producer: {}", err);
    }
    info!("shutdown complete");
}
