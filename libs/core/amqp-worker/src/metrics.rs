//! Prometheus metrics for the AMQP worker.

use crate::error::AmqpError;
use messaging::ErrorKind;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Metrics for one consumed queue.
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    queue: String,
    processor: String,
}

impl WorkerMetrics {
    pub fn new(queue: &str, processor: &str) -> Self {
        Self {
            queue: queue.to_string(),
            processor: processor.to_string(),
        }
    }

    pub fn message_received(&self) {
        counter!(
            "amqp_worker_messages_received_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .increment(1);
    }

    pub fn message_processed(&self, duration: Duration) {
        counter!(
            "amqp_worker_messages_processed_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .increment(1);

        histogram!(
            "amqp_worker_message_duration_seconds",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn message_failed(&self, kind: ErrorKind) {
        counter!(
            "amqp_worker_messages_failed_total",
            "queue" => self.queue.clone(),
            "processor" => self.processor.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    pub fn message_requeued(&self) {
        counter!(
            "amqp_worker_messages_requeued_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    pub fn message_dead_lettered(&self, kind: ErrorKind) {
        counter!(
            "amqp_worker_messages_dead_lettered_total",
            "queue" => self.queue.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    /// Failed message acknowledged without a dead-letter destination
    pub fn message_dropped(&self) {
        counter!(
            "amqp_worker_messages_dropped_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    pub fn broker_call_failed(&self, operation: &'static str) {
        counter!(
            "amqp_worker_broker_errors_total",
            "queue" => self.queue.clone(),
            "operation" => operation
        )
        .increment(1);
    }

    pub fn in_flight(&self, count: usize) {
        gauge!(
            "amqp_worker_in_flight",
            "queue" => self.queue.clone()
        )
        .set(count as f64);
    }
}

/// Install the global Prometheus recorder and return its render handle.
pub fn init_metrics() -> Result<PrometheusHandle, AmqpError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AmqpError::Metrics(e.to_string()))
}
