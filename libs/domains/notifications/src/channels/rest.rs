use super::DeliveryChannel;
use crate::models::{Notification, NotificationType};
use async_trait::async_trait;
use messaging::ProcessingError;
use tracing::info;

/// Clients poll the unread endpoint, so the stored record is the delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestChannel;

#[async_trait]
impl DeliveryChannel for RestChannel {
    fn notification_type(&self) -> NotificationType {
        NotificationType::RestFallback
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ProcessingError> {
        info!(
            external_id = %notification.external_id,
            user_id = %notification.user_id,
            "Notification available via REST"
        );
        Ok(())
    }
}
