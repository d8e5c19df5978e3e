//! Notifications Domain
//!
//! Persists inbound notification messages and delivers them over a
//! per-type channel (email, in-app, REST fallback).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  AMQP Worker    │  ← Consumes notification messages
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  Notification   │  ← Parse, dedupe by external id, persist
//! │   Processor     │
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ ChannelRegistry │  ← Email (SMTP), In-App (websocket), REST
//! └─────────────────┘
//! ```
//!
//! The HTTP side ([`handlers::router`]) serves unread notifications,
//! mark-as-received and the in-app websocket stream.
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{
//!     ChannelRegistry, InAppChannel, InAppHub, MongoNotificationRepository,
//!     NotificationProcessor, RestChannel,
//! };
//!
//! let repository = Arc::new(MongoNotificationRepository::new(&db, op_timeout));
//! let hub = InAppHub::default();
//! let channels = ChannelRegistry::new()
//!     .register(Arc::new(InAppChannel::new(hub.clone())))
//!     .register(Arc::new(RestChannel));
//!
//! let processor = NotificationProcessor::new(repository, channels);
//! ```

pub mod channels;
pub mod error;
pub mod handlers;
pub mod models;
pub mod mongodb;
pub mod processor;
pub mod repository;
pub mod service;

pub use channels::{
    ChannelRegistry, DeliveryChannel, EmailChannel, EmailSender, InAppChannel, InAppEvent,
    InAppHub, LoggingSender, RestChannel, SmtpConfig, SmtpSender,
};
pub use error::{NotificationError, NotificationResult, RepositoryError, RepositoryResult};
pub use handlers::router;
pub use models::{
    DeliveryState, DeliveryStatus, MailInfo, Notification, NotificationMessage, NotificationType,
    NotificationView,
};
pub use self::mongodb::MongoNotificationRepository;
pub use processor::NotificationProcessor;
pub use repository::NotificationRepository;
pub use service::NotificationService;
