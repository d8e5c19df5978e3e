//! Processor trait for message execution.

use crate::error::{ErrorKind, ProcessingError};
use async_trait::async_trait;

/// Message processor trait.
///
/// Receives the raw body of one inbound delivery. The broker adapter owns
/// decoding of the envelope only; payload decoding belongs to the processor so
/// that a malformed body surfaces as a classified failure instead of a
/// transport error.
///
/// # Error Handling
///
/// Return a `ProcessingError` with the appropriate kind:
/// - `Validation`: dead-lettered, never retried
/// - `Retriable`: negatively acknowledged with requeue
/// - `Processing`: dead-lettered, never retried
///
/// # Example
///
/// ```rust,ignore
/// use messaging::{Processor, ProcessingError};
///
/// #[async_trait]
/// impl Processor for NotificationProcessor {
///     async fn process(&self, payload: &[u8]) -> Result<(), ProcessingError> {
///         let message: NotificationMessage = serde_json::from_slice(payload)
///             .map_err(|e| ProcessingError::validation_with_source("invalid JSON format", e))?;
///         self.deliver(message).await
///     }
///
///     fn name(&self) -> &'static str {
///         "notification_processor"
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process one message body.
    async fn process(&self, payload: &[u8]) -> Result<(), ProcessingError>;

    /// Used for logging and metrics labels.
    fn name(&self) -> &'static str;

    /// Readiness of downstream dependencies. Defaults to healthy.
    async fn health_check(&self) -> Result<bool, ProcessingError> {
        Ok(true)
    }
}

/// A processor that accepts everything (for testing).
#[derive(Debug, Clone, Default)]
pub struct NoOpProcessor;

#[async_trait]
impl Processor for NoOpProcessor {
    async fn process(&self, _payload: &[u8]) -> Result<(), ProcessingError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop_processor"
    }
}

/// A processor that always fails with a fixed kind (for testing).
#[derive(Debug, Clone)]
pub struct FailingProcessor {
    kind: ErrorKind,
    message: String,
}

impl FailingProcessor {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn retriable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retriable, message)
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Processing, message)
    }
}

#[async_trait]
impl Processor for FailingProcessor {
    async fn process(&self, _payload: &[u8]) -> Result<(), ProcessingError> {
        Err(match self.kind {
            ErrorKind::Validation => ProcessingError::validation(&self.message),
            ErrorKind::Retriable => ProcessingError::retriable(&self.message),
            ErrorKind::Processing => ProcessingError::processing(&self.message),
        })
    }

    fn name(&self) -> &'static str {
        "failing_processor"
    }
}
