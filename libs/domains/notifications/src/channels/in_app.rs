use super::DeliveryChannel;
use crate::models::{Notification, NotificationType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use messaging::ProcessingError;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Event pushed to websocket sessions
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InAppEvent {
    pub id: Option<String>,
    pub external_id: String,
    pub user_id: Uuid,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Notification> for InAppEvent {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.map(|id| id.to_hex()),
            external_id: n.external_id.clone(),
            user_id: n.user_id,
            subject: n.subject.clone(),
            body: n.body.clone(),
            created_at: n.created_at,
        }
    }
}

/// In-process fan-out to connected sessions. Sessions filter by user.
#[derive(Debug, Clone)]
pub struct InAppHub {
    tx: broadcast::Sender<InAppEvent>,
}

impl InAppHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InAppEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of sessions that received the event.
    pub fn publish(&self, event: InAppEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InAppHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

pub struct InAppChannel {
    hub: InAppHub,
}

impl InAppChannel {
    pub fn new(hub: InAppHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl DeliveryChannel for InAppChannel {
    fn notification_type(&self) -> NotificationType {
        NotificationType::InApp
    }

    /// No connected session is not a failure: the record stays unread and
    /// is served by the unread query.
    async fn deliver(&self, notification: &Notification) -> Result<(), ProcessingError> {
        let sessions = self.hub.publish(InAppEvent::from(notification));
        if sessions == 0 {
            debug!(
                external_id = %notification.external_id,
                user_id = %notification.user_id,
                "No active sessions, notification left unread"
            );
        } else {
            info!(
                external_id = %notification.external_id,
                user_id = %notification.user_id,
                sessions,
                "In-app notification pushed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeliveryStatus;

    fn notification() -> Notification {
        Notification {
            id: None,
            external_id: "ext-7".to_string(),
            user_id: Uuid::new_v4(),
            subject: "Ping".to_string(),
            body: "You have a message".to_string(),
            notification_type: NotificationType::InApp,
            mail_info: None,
            delivery_status: DeliveryStatus::pending(),
            created_at: Utc::now(),
            received_at: None,
        }
    }

    #[tokio::test]
    async fn test_deliver_without_sessions_succeeds() {
        let hub = InAppHub::new(4);
        let channel = InAppChannel::new(hub.clone());

        assert_eq!(hub.session_count(), 0);
        assert!(channel.deliver(&notification()).await.is_ok());
    }

    #[tokio::test]
    async fn test_deliver_reaches_subscriber() {
        let hub = InAppHub::new(4);
        let mut session = hub.subscribe();
        let channel = InAppChannel::new(hub);
        let n = notification();

        channel.deliver(&n).await.unwrap();

        let event = session.recv().await.unwrap();
        assert_eq!(event.external_id, "ext-7");
        assert_eq!(event.user_id, n.user_id);
    }
}
