use crate::channel::NotificationChannel;
use crate::error::{EventBusError, Result as EventBusResult};
use crate::event::Event;
use async_trait::async_trait;
use std::sync::Arc;

/// NATS-backed notification channel.
///
/// Delivery is fire and forget: each event is published on its topic as the
/// NATS subject, so per-record consumers can listen on
/// `verification.status.<id>` directly. Payloads carry the full envelope;
/// identifying metadata travels only as the envelope id and timestamp
/// headers.
pub struct NatsNotificationChannel {
    client: Arc<async_nats::Client>,
}

impl NatsNotificationChannel {
    pub async fn new(nats_url: &str) -> EventBusResult<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .map_err(|_| EventBusError::BrokerConnectionError)?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    pub async fn publish_event(&self, event: &Event) -> EventBusResult<()> {
        let subject = event.topic.clone();

        let mut headers = async_nats::HeaderMap::new();
        headers.insert("event_id", event.id.to_string().as_str());
        headers.insert("timestamp", event.timestamp.to_rfc3339().as_str());

        let payload = serde_json::to_vec(&event).map_err(|_| EventBusError::SerializationError)?;

        self.client
            .publish_with_headers(subject, headers, payload.into())
            .await
            .map_err(|_| EventBusError::PublishError)?;

        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for NatsNotificationChannel {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> EventBusResult<()> {
        self.publish_event(&Event::new(topic, payload)).await
    }
}
