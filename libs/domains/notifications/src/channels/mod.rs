//! Delivery channels.
//!
//! A [`DeliveryChannel`] delivers one notification type. Channels are looked
//! up by type in a [`ChannelRegistry`]; the processor never branches on type.

mod email;
mod in_app;
mod rest;

pub use email::{EmailChannel, EmailContent, EmailSender, LoggingSender, SendError, SmtpConfig, SmtpSender};
pub use in_app::{InAppChannel, InAppEvent, InAppHub};
pub use rest::RestChannel;

#[cfg(test)]
pub use email::MockEmailSender;

use crate::models::{Notification, NotificationType};
use async_trait::async_trait;
use messaging::ProcessingError;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn notification_type(&self) -> NotificationType;

    /// Type-specific precondition, checked before the notification is stored.
    fn validate(&self, _notification: &Notification) -> Result<(), ProcessingError> {
        Ok(())
    }

    /// Errors must already carry their classification.
    async fn deliver(&self, notification: &Notification) -> Result<(), ProcessingError>;
}

/// Lookup table from notification type to channel
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<NotificationType, Arc<dyn DeliveryChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under its own type, replacing any previous one.
    pub fn register(mut self, channel: Arc<dyn DeliveryChannel>) -> Self {
        self.channels.insert(channel.notification_type(), channel);
        self
    }

    pub fn get(&self, notification_type: NotificationType) -> Option<&Arc<dyn DeliveryChannel>> {
        self.channels.get(&notification_type)
    }

    pub fn types(&self) -> Vec<NotificationType> {
        let mut types: Vec<_> = self.channels.keys().copied().collect();
        types.sort_by_key(|t| t.to_string());
        types
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_by_type() {
        let hub = InAppHub::new(8);
        let registry = ChannelRegistry::new()
            .register(Arc::new(RestChannel))
            .register(Arc::new(InAppChannel::new(hub)));

        assert_eq!(registry.len(), 2);
        assert!(registry.get(NotificationType::RestFallback).is_some());
        assert!(registry.get(NotificationType::InApp).is_some());
        assert!(registry.get(NotificationType::Email).is_none());
        assert_eq!(
            registry.types(),
            vec![NotificationType::InApp, NotificationType::RestFallback]
        );
    }

    #[test]
    fn test_register_replaces_same_type() {
        let registry = ChannelRegistry::new()
            .register(Arc::new(RestChannel))
            .register(Arc::new(RestChannel));
        assert_eq!(registry.len(), 1);
    }
}
