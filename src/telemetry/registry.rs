//! # Handler Registry
//!
//! Subscriptions keyed by id and non-telemetry handlers keyed by message type.
//! Lookups for unknown keys return `None` and the caller drops the frame.

use crate::protocol::types::{CommandEnvelope, TelemetryFrame};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Identifier of a telemetry subscription (the protocol's `cmdId`)
pub type SubscriptionId = u64;

/// Callback receiving telemetry frames for one subscription
pub type TelemetryHandler = Arc<dyn Fn(TelemetryFrame) + Send + Sync>;

/// Callback receiving non-telemetry frames of one message type
pub type MessageHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// One device's live telemetry subscription
#[derive(Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub device_id: String,
    pub handler: TelemetryHandler,
    /// Subscribe command as originally sent
    pub command: CommandEnvelope,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct Registry {
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    message_handlers: HashMap<String, MessageHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_subscription(&mut self, subscription: Subscription) {
        self.subscriptions.insert(subscription.id, subscription);
    }

    pub fn remove_subscription(&mut self, id: SubscriptionId) -> Option<Subscription> {
        self.subscriptions.remove(&id)
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    /// Subscriptions in id order
    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.values()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn set_message_handler(&mut self, message_type: &str, handler: MessageHandler) {
        self.message_handlers.insert(message_type.to_string(), handler);
    }

    pub fn remove_message_handler(&mut self, message_type: &str) -> Option<MessageHandler> {
        self.message_handlers.remove(message_type)
    }

    pub fn message_handler(&self, message_type: &str) -> Option<MessageHandler> {
        self.message_handlers.get(message_type).cloned()
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.message_handlers.clear();
    }
}
