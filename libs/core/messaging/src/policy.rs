//! Acknowledgment policy: maps a processing outcome to a broker action.

use crate::error::{ErrorKind, ProcessingError};

/// What the broker adapter must do with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckAction {
    /// Remove the message from the source queue.
    Ack,

    /// Negative-acknowledge with `requeue=true`.
    Requeue,

    /// Republish the original body to the dead-letter destination with
    /// diagnostic headers, then acknowledge.
    DeadLetter { kind: ErrorKind, description: String },
}

/// Decides the [`AckAction`] for an outcome.
///
/// | Outcome | Action |
/// |---------|--------|
/// | `Ok(())` | `Ack` |
/// | `Validation` | `DeadLetter` |
/// | `Retriable` | `Requeue`, or `DeadLetter` once the redelivery limit is reached |
/// | `Processing` | `DeadLetter` |
///
/// Without a limit, retriable failures are requeued indefinitely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckPolicy {
    max_redeliveries: Option<u32>,
}

impl AckPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dead-letter retriable failures whose delivery has already been
    /// redelivered `limit` times.
    pub fn with_max_redeliveries(mut self, limit: Option<u32>) -> Self {
        self.max_redeliveries = limit;
        self
    }

    /// `redeliveries` is how many times the broker delivered this message
    /// before the current attempt (0 on first delivery).
    pub fn decide(&self, outcome: &Result<(), ProcessingError>, redeliveries: u32) -> AckAction {
        let error = match outcome {
            Ok(()) => return AckAction::Ack,
            Err(error) => error,
        };

        match error.kind() {
            ErrorKind::Retriable => match self.max_redeliveries {
                Some(limit) if redeliveries >= limit => AckAction::DeadLetter {
                    kind: ErrorKind::Retriable,
                    description: format!(
                        "{} (gave up after {} redeliveries)",
                        error.description(),
                        redeliveries
                    ),
                },
                _ => AckAction::Requeue,
            },
            kind @ (ErrorKind::Validation | ErrorKind::Processing) => AckAction::DeadLetter {
                kind,
                description: error.description().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_acked() {
        assert_eq!(AckPolicy::new().decide(&Ok(()), 0), AckAction::Ack);
    }

    #[test]
    fn test_validation_and_processing_are_dead_lettered() {
        let policy = AckPolicy::new();

        let action = policy.decide(&Err(ProcessingError::validation("subject is required")), 0);
        assert_eq!(
            action,
            AckAction::DeadLetter {
                kind: ErrorKind::Validation,
                description: "subject is required".to_string(),
            }
        );

        let action = policy.decide(&Err(ProcessingError::processing("no channel")), 7);
        assert_eq!(
            action,
            AckAction::DeadLetter {
                kind: ErrorKind::Processing,
                description: "no channel".to_string(),
            }
        );
    }

    #[test]
    fn test_retriable_requeues_indefinitely_by_default() {
        let policy = AckPolicy::new();
        let outcome = Err(ProcessingError::retriable("database query failed"));

        assert_eq!(policy.decide(&outcome, 0), AckAction::Requeue);
        assert_eq!(policy.decide(&outcome, 10_000), AckAction::Requeue);
    }

    #[test]
    fn test_retriable_dead_letters_at_limit() {
        let policy = AckPolicy::new().with_max_redeliveries(Some(3));
        let outcome = Err(ProcessingError::retriable("database query failed"));

        assert_eq!(policy.decide(&outcome, 2), AckAction::Requeue);

        match policy.decide(&outcome, 3) {
            AckAction::DeadLetter { kind, description } => {
                assert_eq!(kind, ErrorKind::Retriable);
                assert!(description.starts_with("database query failed"));
                assert!(description.contains("3 redeliveries"));
            }
            other => panic!("expected dead letter, got {:?}", other),
        }
    }

    #[test]
    fn test_limit_does_not_affect_non_retriable() {
        let policy = AckPolicy::new().with_max_redeliveries(Some(0));
        assert_eq!(policy.decide(&Ok(()), 5), AckAction::Ack);
        assert!(matches!(
            policy.decide(&Err(ProcessingError::validation("bad")), 0),
            AckAction::DeadLetter {
                kind: ErrorKind::Validation,
                ..
            }
        ));
    }
}
