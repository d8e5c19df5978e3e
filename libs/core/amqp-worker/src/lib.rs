//! RabbitMQ worker framework.
//!
//! Consumes a durable queue with manual acknowledgment and drives a
//! [`messaging::Processor`] for each delivery:
//!
//! - **Bounded concurrency**: at most `max_concurrent_jobs` messages in flight
//! - **Single-owner acknowledgment**: workers send [`AckCommand`]s to one
//!   [`Dispatcher`] task that owns the channel
//! - **Dead-lettering**: failed bodies are republished unchanged with
//!   `x-error-type`, `x-error-message` and `x-timestamp` headers
//! - **Graceful shutdown**: stop consuming, drain in-flight work, drain the
//!   dispatcher
//! - **Health checks** and Prometheus metrics
//!
//! # Example
//!
//! ```ignore
//! use amqp_worker::{connect, AmqpWorker, WorkerConfig};
//! use std::sync::Arc;
//!
//! let config = WorkerConfig::new(uri, "notifications", "notifications", "notification");
//! let (_connection, channel) = connect(&config.uri).await?;
//! let worker = AmqpWorker::new(channel, Arc::new(processor), config).await?;
//! worker.run(shutdown_rx).await?;
//! ```

pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod dlq;
pub mod error;
pub mod health;
pub mod metrics;
pub mod worker;

pub use config::{DeadLetterConfig, WorkerConfig};
pub use consumer::{connect, declare_topology, redelivery_count, InboundMessage};
pub use dispatcher::{AckChannel, AckCommand, Dispatcher, DispatcherHandle};
pub use dlq::DeadLetterHeaders;
pub use error::AmqpError;
pub use health::{HealthServer, HealthState, HealthStatus};
pub use metrics::{init_metrics, WorkerMetrics};
pub use worker::{AmqpWorker, MessageHandler};

// Re-export lapin for convenience
pub use lapin;
pub use metrics_exporter_prometheus::PrometheusHandle;
