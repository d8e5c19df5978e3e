//! Error taxonomy for message processing.

use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification that drives the acknowledgment decision.
///
/// The wire names (`validation`, `retriable`, `processing`) are what the
/// dead-letter headers carry in `x-error-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Input is structurally or semantically invalid. Never retried.
    Validation,

    /// Transient infrastructure failure (store or channel I/O, timeouts).
    Retriable,

    /// Anything else, including an unrecognized type at dispatch. Never retried.
    Processing,
}

impl ErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorKind::Retriable)
    }
}

/// A classified processing failure.
///
/// Every failure leaving a [`Processor`](crate::Processor) carries exactly one
/// [`ErrorKind`]. Foreign errors converted with `From` land in `Processing`.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("retriable error: {message}")]
    Retriable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("processing error: {message}")]
    Processing {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl ProcessingError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            source: None,
        }
    }

    pub fn validation_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn retriable(message: impl Into<String>) -> Self {
        Self::Retriable {
            message: message.into(),
            source: None,
        }
    }

    pub fn retriable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Retriable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            source: None,
        }
    }

    pub fn processing_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Processing {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::Validation { .. } => ErrorKind::Validation,
            ProcessingError::Retriable { .. } => ErrorKind::Retriable,
            ProcessingError::Processing { .. } => ErrorKind::Processing,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind().is_retriable()
    }

    /// Human-readable description, without the kind prefix or the source chain.
    pub fn description(&self) -> &str {
        match self {
            ProcessingError::Validation { message, .. }
            | ProcessingError::Retriable { message, .. }
            | ProcessingError::Processing { message, .. } => message,
        }
    }

    /// Description followed by the source error, if any: `"<description>: <source>"`.
    pub fn detailed(&self) -> String {
        let source = match self {
            ProcessingError::Validation { source, .. }
            | ProcessingError::Retriable { source, .. }
            | ProcessingError::Processing { source, .. } => source,
        };

        match source {
            Some(source) => format!("{}: {}", self.description(), source),
            None => self.description().to_string(),
        }
    }
}

impl From<BoxError> for ProcessingError {
    fn from(err: BoxError) -> Self {
        Self::Processing {
            message: err.to_string(),
            source: Some(err),
        }
    }
}
