//! Read-side operations for the HTTP surface.

use mongodb::bson::oid::ObjectId;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::models::NotificationView;
use crate::repository::NotificationRepository;

pub struct NotificationService<R: NotificationRepository> {
    repository: Arc<R>,
}

impl<R: NotificationRepository> NotificationService<R> {
    /// Shares the repository with the processor.
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    #[instrument(skip(self))]
    pub async fn unread(&self, user_id: Uuid) -> NotificationResult<Vec<NotificationView>> {
        let notifications = self.repository.find_unread_by_user(user_id).await?;
        Ok(notifications.into_iter().map(NotificationView::from).collect())
    }

    /// Idempotent: marking an already received notification succeeds.
    #[instrument(skip(self))]
    pub async fn mark_received(&self, id: &str) -> NotificationResult<()> {
        let object_id =
            ObjectId::parse_str(id).map_err(|_| NotificationError::InvalidId(id.to_string()))?;

        if self.repository.mark_received(object_id).await? {
            Ok(())
        } else {
            Err(NotificationError::NotFound(id.to_string()))
        }
    }
}
