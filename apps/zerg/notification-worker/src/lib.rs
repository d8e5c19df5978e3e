//! Notification Worker Service (RabbitMQ)
//!
//! Consumes notification requests, stores them in MongoDB and delivers them
//! over email, in-app websocket or the REST fallback.
//!
//! ## Architecture
//!
//! ```text
//! RabbitMQ (notifications queue)
//!   ↓ (manual ack, bounded concurrency)
//! AmqpWorker<NotificationProcessor>
//!   ↓ (parse, dedupe by externalId)
//! MongoDB (notifications collection)
//!   ↓
//! ChannelRegistry → Email (SMTP) | In-App (websocket) | REST
//! ```
//!
//! ## Features
//!
//! - Single-owner acknowledgment dispatcher
//! - Dead-letter exchange for validation and processing failures
//! - Graceful shutdown draining in-flight messages
//! - Health, readiness and Prometheus metrics endpoints
//! - Unread query, mark-as-received and in-app stream over HTTP

pub mod config;

use amqp_worker::{AmqpWorker, HealthServer, HealthState, PrometheusHandle};
use axum::Router;
use config::AppConfig;
use core_config::FromEnv;
use database::common::{retry_with_backoff, RetryConfig};
use database::mongodb::connect_database_with_retry;
use domain_notifications::{
    ChannelRegistry, EmailChannel, EmailSender, InAppChannel, InAppHub, LoggingSender,
    MongoNotificationRepository, NotificationProcessor, NotificationRepository,
    NotificationService, RestChannel, SmtpSender,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

/// Run the notification worker
///
/// 1. Loads configuration and sets up structured logging
/// 2. Connects to MongoDB and RabbitMQ with backoff
/// 3. Builds the delivery channels and the processor
/// 4. Serves health, metrics and the query API while consuming
/// 5. Drains in-flight messages on SIGINT/SIGTERM
///
/// # Errors
///
/// Returns an error if configuration is invalid, a dependency cannot be
/// reached, or the consumer stops unexpectedly.
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let config = AppConfig::from_env().wrap_err("Failed to load configuration")?;
    core_config::tracing::init_tracing(&config.environment);

    let metrics_handle =
        amqp_worker::init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "Starting notification worker"
    );

    let db = connect_database_with_retry(&config.mongo, RetryConfig::default())
        .await
        .wrap_err("Failed to connect to MongoDB")?;
    let repository = Arc::new(MongoNotificationRepository::new(
        db,
        config.mongo.op_timeout(),
    ));
    repository
        .ensure_indexes()
        .await
        .wrap_err("Failed to create notification indexes")?;

    info!(queue = %config.worker.queue, "Connecting to RabbitMQ...");
    let (connection, channel) = retry_with_backoff("rabbitmq", RetryConfig::default(), || {
        amqp_worker::connect(&config.worker.uri)
    })
    .await
    .wrap_err("Failed to connect to RabbitMQ")?;

    let hub = InAppHub::new(config.in_app_capacity);
    let channels = build_channels(&config, hub.clone())?;
    info!(channels = ?channels.types(), "Delivery channels registered");

    let processor = Arc::new(NotificationProcessor::new(Arc::clone(&repository), channels));

    let health = HealthState::new();
    let worker = AmqpWorker::new(channel, processor, config.worker.clone())
        .await
        .wrap_err("Failed to create AMQP worker")?
        .with_health(health.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = http_router(health, metrics_handle, repository, hub);
    let listener = tokio::net::TcpListener::bind(config.server.address())
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.server.address()))?;
    info!("HTTP server listening on {}", config.server.address());

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stopped| *stopped).await;
            })
            .await
    });

    let worker = worker.run(shutdown_rx);
    tokio::pin!(worker);

    let worker_result = tokio::select! {
        result = &mut worker => result,
        () = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            worker.await
        }
    };

    // Stops the HTTP server when the consumer ended on its own.
    let _ = shutdown_tx.send(true);

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task panicked"),
    }

    if let Err(e) = connection.close(200, "shutdown").await {
        warn!(error = %e, "Failed to close RabbitMQ connection cleanly");
    }

    worker_result.wrap_err("Worker stopped unexpectedly")?;

    info!("Notification worker stopped");
    Ok(())
}

/// Email goes through SMTP when configured, otherwise it is only logged.
fn build_channels(config: &AppConfig, hub: InAppHub) -> Result<ChannelRegistry> {
    let sender: Arc<dyn EmailSender> = match &config.smtp {
        Some(smtp) => {
            info!(host = %smtp.host, port = smtp.port, "Using SMTP email sender");
            Arc::new(SmtpSender::new(smtp.clone()).wrap_err("Invalid SMTP configuration")?)
        }
        None => {
            warn!("SMTP_HOST not set, emails will be logged instead of sent");
            Arc::new(LoggingSender)
        }
    };

    Ok(ChannelRegistry::new()
        .register(Arc::new(EmailChannel::new(sender)))
        .register(Arc::new(InAppChannel::new(hub)))
        .register(Arc::new(RestChannel)))
}

fn http_router<R: NotificationRepository + 'static>(
    health: HealthState,
    metrics_handle: PrometheusHandle,
    repository: Arc<R>,
    hub: InAppHub,
) -> Router {
    let health_routes = HealthServer::new(health).with_metrics(metrics_handle).router();
    let api = domain_notifications::router(NotificationService::new(repository), hub);

    health_routes.merge(api).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Wait for SIGINT or SIGTERM. A handler that fails to install never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        },
    }
}
