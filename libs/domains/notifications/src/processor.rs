//! Notification processing pipeline.
//!
//! One inbound message goes through: parse and validate, deduplicate by
//! external id, persist, deliver through the registered channel, record the
//! delivery status. The returned outcome drives the broker acknowledgment.

use crate::channels::ChannelRegistry;
use crate::error::RepositoryError;
use crate::models::{DeliveryStatus, Notification, NotificationMessage};
use crate::repository::NotificationRepository;
use async_trait::async_trait;
use messaging::{ProcessingError, Processor};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct NotificationProcessor<R: NotificationRepository> {
    repository: Arc<R>,
    channels: ChannelRegistry,
}

impl<R: NotificationRepository> NotificationProcessor<R> {
    pub fn new(repository: Arc<R>, channels: ChannelRegistry) -> Self {
        Self {
            repository,
            channels,
        }
    }

    /// Decode and validate, including the channel's own precondition.
    pub fn parse(&self, payload: &[u8]) -> Result<Notification, ProcessingError> {
        let message = NotificationMessage::from_slice(payload)?;
        let notification = Notification::try_from(message)?;

        if let Some(channel) = self.channels.get(notification.notification_type) {
            channel.validate(&notification)?;
        }
        Ok(notification)
    }

    async fn lookup(&self, external_id: &str) -> Result<Option<Notification>, ProcessingError> {
        self.repository
            .find_pending_or_failed_by_external_id(external_id)
            .await
            .map_err(|e| ProcessingError::retriable_with_source("database query failed", e))
    }

    /// Returns the record to deliver, or `None` if it was already sent.
    async fn resolve(
        &self,
        mut notification: Notification,
    ) -> Result<Option<Notification>, ProcessingError> {
        if let Some(existing) = self.lookup(&notification.external_id).await? {
            debug!(
                external_id = %existing.external_id,
                notification_id = ?existing.id,
                status = %existing.delivery_status.status,
                "Reusing existing notification"
            );
            return Ok(Some(existing));
        }

        match self.repository.save(&notification).await {
            Ok(id) => {
                notification.id = Some(id);
                Ok(Some(notification))
            }
            Err(RepositoryError::Duplicate(_)) => {
                // Either a concurrent delivery inserted it, or it is already Sent
                self.lookup(&notification.external_id).await
            }
            Err(e) => Err(ProcessingError::retriable_with_source(
                "database operation failed",
                e,
            )),
        }
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ProcessingError> {
        let channel = self
            .channels
            .get(notification.notification_type)
            .ok_or_else(|| {
                ProcessingError::processing(format!(
                    "no delivery channel for notification type: {}",
                    notification.notification_type
                ))
            })?;

        channel.deliver(notification).await
    }

    /// Best effort: a failed write is logged and never changes the outcome.
    async fn record_status(
        &self,
        notification: &Notification,
        outcome: &Result<(), ProcessingError>,
    ) {
        let Some(id) = notification.id else {
            warn!(
                external_id = %notification.external_id,
                "Notification has no id, status not recorded"
            );
            return;
        };

        let status = match outcome {
            Ok(()) => DeliveryStatus::sent(),
            Err(e) if e.is_retriable() => DeliveryStatus::retrying(e.detailed()),
            Err(e) => DeliveryStatus::failed(e.detailed()),
        };
        let state = status.status;

        match self.repository.update_status(id, status).await {
            Ok(true) => {}
            Ok(false) => debug!(
                notification_id = %id,
                status = %state,
                "Notification already sent, status left unchanged"
            ),
            Err(e) => warn!(
                notification_id = %id,
                status = %state,
                error = %e,
                "Failed to update notification status"
            ),
        }
    }
}

#[async_trait]
impl<R: NotificationRepository + 'static> Processor for NotificationProcessor<R> {
    async fn process(&self, payload: &[u8]) -> Result<(), ProcessingError> {
        let notification = self.parse(payload)?;
        let external_id = notification.external_id.clone();

        let Some(notification) = self.resolve(notification).await? else {
            info!(external_id = %external_id, "Notification already delivered, skipping");
            return Ok(());
        };

        let outcome = self.deliver(&notification).await;
        self.record_status(&notification, &outcome).await;

        match &outcome {
            Ok(()) => info!(
                external_id = %external_id,
                notification_id = ?notification.id,
                notification_type = %notification.notification_type,
                user_id = %notification.user_id,
                "Notification delivered"
            ),
            Err(e) => warn!(
                external_id = %external_id,
                notification_type = %notification.notification_type,
                error_type = %e.kind(),
                error = %e.detailed(),
                "Notification delivery failed"
            ),
        }

        outcome
    }

    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn health_check(&self) -> Result<bool, ProcessingError> {
        self.repository
            .ping()
            .await
            .map(|()| true)
            .map_err(|e| ProcessingError::retriable_with_source("store ping failed", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{DeliveryChannel, EmailChannel, MockEmailSender, RestChannel};
    use crate::models::{DeliveryState, NotificationType};
    use crate::repository::MockNotificationRepository;
    use messaging::{AckAction, AckPolicy, ErrorKind};
    use mongodb::bson::oid::ObjectId;
    use std::sync::Mutex;

    const USER: &str = "7f0b7f5e-2a0e-4a5a-9d0c-3f1f3c1b2a10";

    fn email_payload(external_id: &str, subject: &str, to: &str) -> Vec<u8> {
        format!(
            r#"{{"userId":"{USER}","externalId":"{external_id}","subject":"{subject}","body":"Hello","type":"email","mailInfo":{{"to":"{to}"}}}}"#
        )
        .into_bytes()
    }

    fn typed_payload(external_id: &str, notification_type: &str) -> Vec<u8> {
        format!(
            r#"{{"userId":"{USER}","externalId":"{external_id}","subject":"Hi","body":"Hello","type":"{notification_type}"}}"#
        )
        .into_bytes()
    }

    /// Records deliveries and answers with a fixed outcome.
    struct StubChannel {
        notification_type: NotificationType,
        fail_with: Option<ErrorKind>,
        delivered: Mutex<Vec<String>>,
    }

    impl StubChannel {
        fn ok(notification_type: NotificationType) -> Arc<Self> {
            Self::failing(notification_type, None)
        }

        fn failing(notification_type: NotificationType, fail_with: Option<ErrorKind>) -> Arc<Self> {
            Arc::new(Self {
                notification_type,
                fail_with,
                delivered: Mutex::new(Vec::new()),
            })
        }

        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryChannel for StubChannel {
        fn notification_type(&self) -> NotificationType {
            self.notification_type
        }

        async fn deliver(&self, notification: &Notification) -> Result<(), ProcessingError> {
            self.delivered
                .lock()
                .unwrap()
                .push(notification.external_id.clone());
            match self.fail_with {
                None => Ok(()),
                Some(ErrorKind::Retriable) => Err(ProcessingError::retriable("channel unavailable")),
                Some(ErrorKind::Validation) => Err(ProcessingError::validation("bad recipient")),
                Some(ErrorKind::Processing) => Err(ProcessingError::processing("channel crashed")),
            }
        }
    }

    /// Repository mock backed by a single in-memory slot.
    fn stateful_repository(slot: Arc<Mutex<Option<Notification>>>) -> MockNotificationRepository {
        let mut repo = MockNotificationRepository::new();

        let find_slot = slot.clone();
        repo.expect_find_pending_or_failed_by_external_id()
            .returning(move |external_id| {
                Ok(find_slot
                    .lock()
                    .unwrap()
                    .clone()
                    .filter(|n| n.external_id == external_id && !n.is_sent()))
            });

        let save_slot = slot.clone();
        repo.expect_save().returning(move |notification| {
            let mut slot = save_slot.lock().unwrap();
            if slot
                .as_ref()
                .is_some_and(|n| n.external_id == notification.external_id)
            {
                return Err(RepositoryError::Duplicate(notification.external_id.clone()));
            }
            let id = ObjectId::new();
            let mut stored = notification.clone();
            stored.id = Some(id);
            *slot = Some(stored);
            Ok(id)
        });

        // Same guard as the Mongo filter: Sent is never overwritten
        let update_slot = slot;
        repo.expect_update_status().returning(move |id, status| {
            match update_slot.lock().unwrap().as_mut() {
                Some(stored) if stored.id == Some(id) && !stored.is_sent() => {
                    stored.delivery_status = status;
                    Ok(true)
                }
                _ => Ok(false),
            }
        });

        repo
    }

    fn processor_with(
        repo: MockNotificationRepository,
        channel: Arc<dyn DeliveryChannel>,
    ) -> NotificationProcessor<MockNotificationRepository> {
        NotificationProcessor::new(Arc::new(repo), ChannelRegistry::new().register(channel))
    }

    #[tokio::test]
    async fn test_email_success_marks_sent_and_acks() {
        let slot = Arc::new(Mutex::new(None));
        let repo = stateful_repository(slot.clone());

        let mut sender = MockEmailSender::new();
        sender
            .expect_send()
            .withf(|email| email.to.email.to_string() == "jane@example.com")
            .times(1)
            .returning(|_| Ok(()));
        sender.expect_name().return_const("mock");

        let processor = processor_with(repo, Arc::new(EmailChannel::new(Arc::new(sender))));
        let outcome = processor
            .process(&email_payload("ext-1", "Welcome", "jane@example.com"))
            .await;

        assert!(outcome.is_ok());
        assert_eq!(AckPolicy::new().decide(&outcome, 0), AckAction::Ack);

        let stored = slot.lock().unwrap().clone().unwrap();
        assert_eq!(stored.delivery_status.status, DeliveryState::Sent);
        assert!(stored.delivery_status.error.is_none());
    }

    #[tokio::test]
    async fn test_redelivery_reuses_existing_record() {
        let slot = Arc::new(Mutex::new(None));
        let repo = stateful_repository(slot.clone());
        let channel = StubChannel::failing(NotificationType::RestFallback, Some(ErrorKind::Retriable));
        let processor = processor_with(repo, channel.clone());
        let payload = typed_payload("ext-42", "rest");

        let first = processor.process(&payload).await;
        assert_eq!(first.unwrap_err().kind(), ErrorKind::Retriable);
        let first_id = slot.lock().unwrap().as_ref().and_then(|n| n.id);

        let second = processor.process(&payload).await;
        assert!(second.is_err());
        let second_id = slot.lock().unwrap().as_ref().and_then(|n| n.id);

        // A second `save` would have replaced the id or failed as Duplicate
        assert!(first_id.is_some());
        assert_eq!(first_id, second_id);
        assert_eq!(channel.delivered(), vec!["ext-42", "ext-42"]);

        let stored = slot.lock().unwrap().clone().unwrap();
        assert_eq!(stored.delivery_status.status, DeliveryState::Pending);
        assert!(
            stored
                .delivery_status
                .error
                .unwrap()
                .contains("channel unavailable")
        );
    }

    #[tokio::test]
    async fn test_empty_subject_never_reaches_store_or_channel() {
        // No expectations: any repository call panics
        let repo = MockNotificationRepository::new();
        let channel = StubChannel::ok(NotificationType::Email);
        let processor = processor_with(repo, channel.clone());

        let outcome = processor
            .process(&email_payload("ext-1", "", "jane@example.com"))
            .await;

        let err = outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.description(), "subject is required");
        assert!(channel.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_recipient_rejected_before_store() {
        let repo = MockNotificationRepository::new();
        let processor = processor_with(
            repo,
            Arc::new(EmailChannel::new(Arc::new(MockEmailSender::new()))),
        );

        let err = processor
            .process(&email_payload("ext-1", "Hi", "not-an-email"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.description(), "invalid email address format");
    }

    #[tokio::test]
    async fn test_lookup_failure_is_retriable_and_requeued() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_find_pending_or_failed_by_external_id()
            .times(1)
            .returning(|_| Err(RepositoryError::Database("connection reset".to_string())));
        let channel = StubChannel::ok(NotificationType::RestFallback);
        let processor = processor_with(repo, channel.clone());

        let outcome = processor.process(&typed_payload("ext-1", "rest")).await;

        let err = outcome.as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retriable);
        assert_eq!(err.description(), "database query failed");
        assert_eq!(AckPolicy::new().decide(&outcome, 0), AckAction::Requeue);
        assert!(channel.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_is_retriable() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_find_pending_or_failed_by_external_id()
            .returning(|_| Ok(None));
        repo.expect_save()
            .times(1)
            .returning(|_| Err(RepositoryError::Timeout(std::time::Duration::from_secs(5))));
        let processor = processor_with(repo, StubChannel::ok(NotificationType::RestFallback));

        let err = processor
            .process(&typed_payload("ext-1", "rest"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Retriable);
        assert_eq!(err.description(), "database operation failed");
    }

    #[tokio::test]
    async fn test_unknown_type_is_dead_lettered() {
        let repo = MockNotificationRepository::new();
        let processor = processor_with(repo, StubChannel::ok(NotificationType::Email));

        let outcome = processor.process(&typed_payload("ext-1", "fax")).await;

        let err = outcome.as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.description(), "unknown notification type: fax");
        assert!(matches!(
            AckPolicy::new().with_max_redeliveries(None).decide(&outcome, 0),
            AckAction::DeadLetter {
                kind: ErrorKind::Validation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_channel_is_processing_and_marks_failed() {
        let slot = Arc::new(Mutex::new(None));
        let repo = stateful_repository(slot.clone());
        // Only REST registered, message asks for in-app
        let processor = processor_with(repo, StubChannel::ok(NotificationType::RestFallback));

        let err = processor
            .process(&typed_payload("ext-5", "in_app"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Processing);

        let stored = slot.lock().unwrap().clone().unwrap();
        assert_eq!(stored.delivery_status.status, DeliveryState::Failed);
    }

    #[tokio::test]
    async fn test_permanent_channel_failure_marks_failed() {
        let slot = Arc::new(Mutex::new(None));
        let repo = stateful_repository(slot.clone());
        let channel = StubChannel::failing(NotificationType::InApp, Some(ErrorKind::Processing));
        let processor = processor_with(repo, channel);

        let err = processor
            .process(&typed_payload("ext-6", "websocket"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Processing);

        let stored = slot.lock().unwrap().clone().unwrap();
        assert_eq!(stored.delivery_status.status, DeliveryState::Failed);
        assert!(
            stored
                .delivery_status
                .error
                .unwrap()
                .contains("channel crashed")
        );
    }

    #[tokio::test]
    async fn test_duplicate_on_save_for_sent_record_is_success() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_find_pending_or_failed_by_external_id()
            .times(2)
            .returning(|_| Ok(None));
        repo.expect_save()
            .times(1)
            .returning(|n| Err(RepositoryError::Duplicate(n.external_id.clone())));
        let channel = StubChannel::ok(NotificationType::RestFallback);
        let processor = processor_with(repo, channel.clone());

        let outcome = processor.process(&typed_payload("ext-sent", "rest")).await;

        assert!(outcome.is_ok());
        assert!(channel.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_on_save_delivers_concurrent_record() {
        let id = ObjectId::new();
        let existing = Arc::new(Mutex::new(None::<Notification>));
        let calls = Arc::new(Mutex::new(0u32));

        let mut repo = MockNotificationRepository::new();
        let lookup_existing = existing.clone();
        repo.expect_find_pending_or_failed_by_external_id()
            .times(2)
            .returning(move |_| {
                let mut calls = calls.lock().unwrap();
                *calls += 1;
                Ok(if *calls == 1 {
                    None
                } else {
                    lookup_existing.lock().unwrap().clone()
                })
            });
        let save_existing = existing.clone();
        repo.expect_save().times(1).returning(move |n| {
            let mut concurrent = n.clone();
            concurrent.id = Some(id);
            *save_existing.lock().unwrap() = Some(concurrent);
            Err(RepositoryError::Duplicate(n.external_id.clone()))
        });
        repo.expect_update_status()
            .withf(move |updated, status| *updated == id && status.status == DeliveryState::Sent)
            .times(1)
            .returning(|_, _| Ok(true));
        let channel = StubChannel::ok(NotificationType::RestFallback);
        let processor = processor_with(repo, channel.clone());

        let outcome = processor.process(&typed_payload("ext-race", "rest")).await;

        assert!(outcome.is_ok());
        assert_eq!(channel.delivered(), vec!["ext-race"]);
    }

    #[tokio::test]
    async fn test_status_write_failure_keeps_outcome() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_find_pending_or_failed_by_external_id()
            .returning(|_| Ok(None));
        repo.expect_save().returning(|_| Ok(ObjectId::new()));
        repo.expect_update_status()
            .times(1)
            .returning(|_, _| Err(RepositoryError::Database("write conflict".to_string())));
        let processor = processor_with(repo, Arc::new(RestChannel));

        assert!(processor.process(&typed_payload("ext-1", "rest")).await.is_ok());
    }

    #[tokio::test]
    async fn test_health_check_pings_store() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_ping().times(1).returning(|| Ok(()));
        let processor = processor_with(repo, Arc::new(RestChannel));
        assert!(processor.health_check().await.unwrap());

        let mut repo = MockNotificationRepository::new();
        repo.expect_ping()
            .returning(|| Err(RepositoryError::Timeout(std::time::Duration::from_secs(5))));
        let processor = processor_with(repo, Arc::new(RestChannel));
        assert_eq!(
            processor.health_check().await.unwrap_err().kind(),
            ErrorKind::Retriable
        );
    }

    /// First delivery attempt parks until the second one has finished, then
    /// fails as Retriable.
    struct RacingChannel {
        attempts: Mutex<u32>,
        released: tokio::sync::Notify,
    }

    #[async_trait]
    impl DeliveryChannel for RacingChannel {
        fn notification_type(&self) -> NotificationType {
            NotificationType::RestFallback
        }

        async fn deliver(&self, _notification: &Notification) -> Result<(), ProcessingError> {
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                *attempts += 1;
                *attempts
            };
            if attempt == 1 {
                self.released.notified().await;
                Err(ProcessingError::retriable("channel unavailable"))
            } else {
                self.released.notify_one();
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_late_retriable_failure_does_not_reopen_sent_record() {
        let slot = Arc::new(Mutex::new(None));
        let repo = stateful_repository(slot.clone());
        let channel = Arc::new(RacingChannel {
            attempts: Mutex::new(0),
            released: tokio::sync::Notify::new(),
        });
        let processor = processor_with(repo, channel.clone());
        let payload = typed_payload("ext-concurrent", "rest");

        let (slow, fast) = tokio::join!(processor.process(&payload), processor.process(&payload));

        assert_eq!(slow.unwrap_err().kind(), ErrorKind::Retriable);
        assert!(fast.is_ok());
        let stored = slot.lock().unwrap().clone().unwrap();
        assert_eq!(stored.delivery_status.status, DeliveryState::Sent);

        // The requeued copy finds the record sent and acks without delivering
        let redelivery = processor.process(&payload).await;
        assert!(redelivery.is_ok());
        assert_eq!(*channel.attempts.lock().unwrap(), 2);
        assert_eq!(
            slot.lock().unwrap().clone().unwrap().delivery_status.status,
            DeliveryState::Sent
        );
    }
}
