//! Notification channel trait and the in-memory bus

use crate::error::Result;
use crate::event::Event;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Outbound notification channel used by the verification pipeline.
///
/// Implementations must be cheaply cloneable behind an `Arc` and safe to
/// call from concurrent worker tasks. Callers treat `publish` as
/// fire-and-forget: on error they log and continue.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Publish a payload on a topic.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()>;
}

/// In-process notification bus.
///
/// Captures every published event for inspection and fans out live copies
/// to broadcast subscribers. Slow or absent subscribers never block a
/// publisher. Clones share the same capture log and broadcast channel.
#[derive(Clone)]
pub struct InMemoryEventsBus {
    published: Arc<RwLock<Vec<Event>>>,
    sender: broadcast::Sender<Event>,
}

impl InMemoryEventsBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            published: Arc::new(RwLock::new(Vec::new())),
            sender,
        }
    }

    /// Every event published so far, in publication order.
    pub async fn published(&self) -> Vec<Event> {
        self.published.read().await.clone()
    }

    /// Events published on one exact topic.
    pub async fn published_on(&self, topic: &str) -> Vec<Event> {
        self.published
            .read()
            .await
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Live subscription to all events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for InMemoryEventsBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for InMemoryEventsBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<()> {
        let event = Event::new(topic, payload);
        self.published.write().await.push(event.clone());
        // A send error only means nobody is listening right now.
        let _ = self.sender.send(event);
        Ok(())
    }
}
