//! MongoDB implementation of NotificationRepository

use async_trait::async_trait;
use chrono::Utc;
use database::mongodb::check_health;
use futures_util::TryStreamExt;
use mongodb::{
    Collection, Database, IndexModel,
    bson::{Document, doc, oid::ObjectId, to_bson},
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
};
use std::future::IntoFuture;
use std::time::Duration;
use tokio::time::timeout;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{RepositoryError, RepositoryResult};
use crate::models::{DeliveryState, DeliveryStatus, Notification};
use crate::repository::NotificationRepository;

pub const DEFAULT_COLLECTION: &str = "notifications";

const DUPLICATE_KEY: i32 = 11000;

pub struct MongoNotificationRepository {
    database: Database,
    collection: Collection<Notification>,
    op_timeout: Duration,
}

impl MongoNotificationRepository {
    pub fn new(db: Database, op_timeout: Duration) -> Self {
        Self::with_collection(db, DEFAULT_COLLECTION, op_timeout)
    }

    pub fn with_collection(db: Database, collection_name: &str, op_timeout: Duration) -> Self {
        let collection = db.collection::<Notification>(collection_name);
        Self {
            database: db,
            collection,
            op_timeout,
        }
    }

    pub fn collection(&self) -> &Collection<Notification> {
        &self.collection
    }

    async fn timed<T, F>(&self, operation: F) -> RepositoryResult<Result<T, mongodb::error::Error>>
    where
        F: IntoFuture<Output = Result<T, mongodb::error::Error>>,
    {
        timeout(self.op_timeout, operation)
            .await
            .map_err(|_| RepositoryError::Timeout(self.op_timeout))
    }

    fn pending_or_failed_filter(external_id: &str) -> Document {
        doc! {
            "externalId": external_id,
            "deliveryStatus.status": {
                "$in": [DeliveryState::Pending.to_string(), DeliveryState::Failed.to_string()]
            },
        }
    }

    /// Sent is terminal: status writes only match records not yet sent.
    fn unsent_filter(id: ObjectId) -> Document {
        doc! {
            "_id": id,
            "deliveryStatus.status": { "$ne": DeliveryState::Sent.to_string() },
        }
    }

    fn unread_filter(user_id: Uuid) -> Document {
        doc! {
            "userId": user_id.hyphenated().to_string(),
            "receivedAt": { "$exists": false },
        }
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

fn encode<T: serde::Serialize>(value: &T) -> RepositoryResult<mongodb::bson::Bson> {
    to_bson(value).map_err(|e| RepositoryError::Database(format!("failed to encode: {}", e)))
}

#[async_trait]
impl NotificationRepository for MongoNotificationRepository {
    #[instrument(skip(self, notification), fields(external_id = %notification.external_id))]
    async fn save(&self, notification: &Notification) -> RepositoryResult<ObjectId> {
        let id = notification.id.unwrap_or_else(ObjectId::new);
        let mut record = notification.clone();
        record.id = Some(id);

        match self.timed(self.collection.insert_one(&record)).await? {
            Ok(_) => {
                tracing::debug!(notification_id = %id, "Notification saved");
                Ok(id)
            }
            Err(e) if is_duplicate_key(&e) => {
                Err(RepositoryError::Duplicate(notification.external_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn find_pending_or_failed_by_external_id(
        &self,
        external_id: &str,
    ) -> RepositoryResult<Option<Notification>> {
        let filter = Self::pending_or_failed_filter(external_id);
        let found = self.timed(self.collection.find_one(filter)).await??;
        Ok(found)
    }

    #[instrument(skip(self, status), fields(status = %status.status))]
    async fn update_status(&self, id: ObjectId, status: DeliveryStatus) -> RepositoryResult<bool> {
        let update = doc! { "$set": { "deliveryStatus": encode(&status)? } };
        let result = self
            .timed(self.collection.update_one(Self::unsent_filter(id), update))
            .await??;

        Ok(result.matched_count > 0)
    }

    #[instrument(skip(self))]
    async fn find_unread_by_user(&self, user_id: Uuid) -> RepositoryResult<Vec<Notification>> {
        let filter = Self::unread_filter(user_id);
        let notifications = self
            .timed(async {
                let cursor = self
                    .collection
                    .find(filter)
                    .sort(doc! { "createdAt": -1 })
                    .await?;
                cursor.try_collect::<Vec<_>>().await
            })
            .await??;
        Ok(notifications)
    }

    #[instrument(skip(self))]
    async fn mark_received(&self, id: ObjectId) -> RepositoryResult<bool> {
        let filter = doc! { "_id": id, "receivedAt": { "$exists": false } };
        let update = doc! { "$set": { "receivedAt": encode(&Utc::now())? } };
        let result = self
            .timed(self.collection.update_one(filter, update))
            .await??;

        if result.matched_count > 0 {
            return Ok(true);
        }

        // Already received, or unknown id
        let existing = self
            .timed(self.collection.count_documents(doc! { "_id": id }))
            .await??;
        Ok(existing > 0)
    }

    async fn ensure_indexes(&self) -> RepositoryResult<()> {
        let indexes = vec![
            IndexModel::builder()
                .keys(doc! { "externalId": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            IndexModel::builder()
                .keys(doc! { "externalId": 1, "deliveryStatus.status": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "userId": 1, "createdAt": -1 })
                .build(),
        ];

        self.timed(self.collection.create_indexes(indexes)).await??;
        tracing::info!(collection = %self.collection.name(), "Notification indexes ensured");
        Ok(())
    }

    async fn ping(&self) -> RepositoryResult<()> {
        let status = timeout(self.op_timeout, check_health(&self.database))
            .await
            .map_err(|_| RepositoryError::Timeout(self.op_timeout))?;

        if status.healthy {
            Ok(())
        } else {
            Err(RepositoryError::Database(
                status.message.unwrap_or_else(|| "ping failed".to_string()),
            ))
        }
    }
}
