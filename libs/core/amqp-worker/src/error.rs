//! Error types for the AMQP worker.

use thiserror::Error;

/// Error that can occur in AMQP worker operations.
#[derive(Debug, Error)]
pub enum AmqpError {
    /// Client or broker error
    #[error("AMQP error: {0}")]
    Lapin(#[from] lapin::Error),

    /// Exchange, queue or binding declaration failed
    #[error("Failed to declare {what}: {source}")]
    Declare {
        what: String,
        #[source]
        source: lapin::Error,
    },

    /// Publish was not confirmed by the broker
    #[error("Publish error: {0}")]
    Publish(String),

    /// The acknowledgment dispatcher is no longer running
    #[error("Acknowledgment dispatcher stopped")]
    DispatcherClosed,

    /// The broker closed the consumer stream
    #[error("Consumer stream closed by broker")]
    ConsumerClosed,

    /// Metrics recorder could not be installed
    #[error("Metrics error: {0}")]
    Metrics(String),
}

impl AmqpError {
    pub(crate) fn declare(what: impl Into<String>, source: lapin::Error) -> Self {
        Self::Declare {
            what: what.into(),
            source,
        }
    }
}
