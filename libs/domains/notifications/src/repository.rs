use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;
use uuid::Uuid;

use crate::error::RepositoryResult;
use crate::models::{DeliveryStatus, Notification};

/// Persistence contract for notifications.
///
/// All operations are bounded by the implementation's operation timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Insert a new record and return its assigned id.
    ///
    /// Fails with `Duplicate` if the external id is already stored.
    async fn save(&self, notification: &Notification) -> RepositoryResult<ObjectId>;

    /// Find the record for `external_id` whose status is Pending or Failed.
    async fn find_pending_or_failed_by_external_id(
        &self,
        external_id: &str,
    ) -> RepositoryResult<Option<Notification>>;

    /// Overwrite the delivery status unless the record is already Sent.
    ///
    /// Returns false when nothing was written: the record is Sent (terminal)
    /// or does not exist.
    async fn update_status(&self, id: ObjectId, status: DeliveryStatus)
    -> RepositoryResult<bool>;

    /// Records of `user_id` without `receivedAt`, newest first.
    async fn find_unread_by_user(&self, user_id: Uuid) -> RepositoryResult<Vec<Notification>>;

    /// Set `receivedAt` if unset. Returns false if no such record exists.
    async fn mark_received(&self, id: ObjectId) -> RepositoryResult<bool>;

    async fn ensure_indexes(&self) -> RepositoryResult<()>;

    async fn ping(&self) -> RepositoryResult<()>;
}
