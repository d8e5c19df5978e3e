use chrono::{DateTime, Utc};
use messaging::ProcessingError;
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Delivery channel selector
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum NotificationType {
    #[strum(to_string = "email", serialize = "mail")]
    Email,
    #[strum(to_string = "in_app", serialize = "inapp", serialize = "websocket")]
    InApp,
    #[strum(to_string = "rest_fallback", serialize = "rest")]
    RestFallback,
}

/// Delivery state. Only `Pending -> Sent` and `Pending -> Failed` occur;
/// `Sent` is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeliveryState {
    #[default]
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    pub status: DeliveryState,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryStatus {
    pub fn pending() -> Self {
        Self {
            status: DeliveryState::Pending,
            updated_at: Utc::now(),
            error: None,
        }
    }

    pub fn sent() -> Self {
        Self {
            status: DeliveryState::Sent,
            updated_at: Utc::now(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: DeliveryState::Failed,
            updated_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    /// Still pending, with the error of the last retriable attempt
    pub fn retrying(error: impl Into<String>) -> Self {
        Self {
            status: DeliveryState::Pending,
            updated_at: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// Email addressing. `to` is a single mailbox, `cc`/`bcc` are lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailInfo {
    #[serde(default)]
    pub to: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
}

/// Persisted notification record (collection `notifications`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Assigned by the store on first save
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// Caller-assigned deduplication key
    pub external_id: String,
    #[serde(with = "hyphenated")]
    pub user_id: Uuid,
    pub subject: String,
    pub body: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mail_info: Option<MailInfo>,
    pub delivery_status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_sent(&self) -> bool {
        self.delivery_status.status == DeliveryState::Sent
    }
}

/// User ids are stored as hyphenated strings regardless of serializer.
mod hyphenated {
    use serde::{Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(id: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&id.hyphenated().to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uuid, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Uuid::parse_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// Inbound broker payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    #[serde(default, alias = "userID")]
    pub user_id: Option<Uuid>,
    #[serde(default, alias = "messageId", alias = "externalID")]
    pub external_id: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, rename = "type")]
    pub notification_type: Option<String>,
    #[serde(default)]
    pub mail_info: Option<MailInfo>,
}

impl NotificationMessage {
    pub fn from_slice(payload: &[u8]) -> Result<Self, ProcessingError> {
        serde_json::from_slice(payload)
            .map_err(|e| ProcessingError::validation_with_source("invalid JSON format", e))
    }
}

impl TryFrom<NotificationMessage> for Notification {
    type Error = ProcessingError;

    /// Structural validation; channel-specific checks run separately.
    fn try_from(message: NotificationMessage) -> Result<Self, Self::Error> {
        let user_id = match message.user_id {
            Some(id) if !id.is_nil() => id,
            _ => return Err(ProcessingError::validation("userID is required")),
        };
        if message.subject.trim().is_empty() {
            return Err(ProcessingError::validation("subject is required"));
        }
        if message.body.trim().is_empty() {
            return Err(ProcessingError::validation("body is required"));
        }
        let external_id = match message.external_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(ProcessingError::validation("externalId is required")),
        };
        let notification_type = match message.notification_type.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(ProcessingError::validation("notification type is required"));
            }
            Some(raw) => raw.parse::<NotificationType>().map_err(|_| {
                ProcessingError::validation(format!("unknown notification type: {}", raw))
            })?,
        };

        Ok(Self {
            id: None,
            external_id,
            user_id,
            subject: message.subject,
            body: message.body,
            notification_type,
            mail_info: message.mail_info,
            delivery_status: DeliveryStatus::pending(),
            created_at: Utc::now(),
            received_at: None,
        })
    }
}

/// HTTP representation of a notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: Option<String>,
    pub external_id: String,
    pub user_id: Uuid,
    pub subject: String,
    pub body: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub status: DeliveryState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

impl From<Notification> for NotificationView {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id.map(|id| id.to_hex()),
            external_id: n.external_id,
            user_id: n.user_id,
            subject: n.subject,
            body: n.body,
            notification_type: n.notification_type,
            status: n.delivery_status.status,
            created_at: n.created_at,
            received_at: n.received_at,
        }
    }
}
