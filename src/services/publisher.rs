//! MQTT publication of capture results.

use crate::config::MqttConfig;
use crate::models::{CaptureOutcome, CaptureResult, SnapshotEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("disconnect failed: {0}")]
    DisconnectFailed(String),
}

/// Message broker boundary, mockable in tests.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), SinkError>;

    /// Flushes and tears down the connection. Default is a no-op.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Normalizes a camera name into a topic segment: ASCII transliteration,
/// lowercase, anything outside `[a-z0-9_-]` folded to `_`.
pub fn slugify(name: &str) -> String {
    deunicode::deunicode(name)
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// MQTT sink backed by rumqttc. `connect` spawns the event loop driver; the
/// task ends once `close` disconnects the client.
pub struct MqttSink {
    client: AsyncClient,
}

impl MqttSink {
    pub fn connect(config: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password.expose_secret());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 16);
        tokio::spawn(async move {
            loop {
                if let Err(e) = event_loop.poll().await {
                    warn!(error = %e, "mqtt event loop terminated");
                    break;
                }
            }
        });

        Self { client }
    }
}

#[async_trait]
impl MessageSink for MqttSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), SinkError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| SinkError::PublishFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| SinkError::DisconnectFailed(e.to_string()))
    }
}

/// In-memory sink for tests: records every message, optionally failing each
/// publish.
pub struct MockSink {
    failing: bool,
    messages: std::sync::Mutex<Vec<(String, Vec<u8>, bool)>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            failing: false,
            messages: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            messages: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<(String, Vec<u8>, bool)> {
        self.messages.lock().unwrap().clone()
    }
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSink for MockSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), SinkError> {
        if self.failing {
            return Err(SinkError::PublishFailed("mock sink is failing".to_string()));
        }
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, retain));
        Ok(())
    }
}

/// Turns successful capture results into retained snapshot events on
/// `<namespace>/snapshot/<slug(camera name)>`. Non-success results are
/// logged only; a sink failure is scoped to its camera.
pub struct ResultPublisher {
    sink: Arc<dyn MessageSink>,
    namespace: String,
    retain: bool,
    /// Shared by every event of the batch.
    batch_timestamp: DateTime<Utc>,
}

impl ResultPublisher {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        namespace: String,
        retain: bool,
        batch_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sink,
            namespace,
            retain,
            batch_timestamp,
        }
    }

    pub fn topic_for(&self, camera_name: &str) -> String {
        format!("{}/snapshot/{}", self.namespace, slugify(camera_name))
    }

    pub async fn publish_result(&self, result: &CaptureResult) {
        let camera = &result.camera;
        let pic_url = match &result.outcome {
            CaptureOutcome::Success { pic_url } => pic_url,
            other => {
                warn!(
                    camera = %camera.name,
                    serial = %camera.serial,
                    outcome = ?other,
                    "capture did not succeed, nothing published"
                );
                return;
            }
        };

        let event = SnapshotEvent {
            name: camera.name.clone(),
            serial: camera.serial.clone(),
            channel: camera.channel,
            quality: result.quality_used,
            pic_url: pic_url.clone(),
            captured_at: self.batch_timestamp,
            area_domain: result.area_domain.clone(),
            code: "200".to_string(),
            account_id: camera.account_id.clone(),
        };

        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(camera = %camera.name, error = %e, "failed to encode snapshot event");
                return;
            }
        };

        let topic = self.topic_for(&camera.name);
        match self.sink.publish(&topic, payload, self.retain).await {
            Ok(()) => {
                info!(camera = %camera.name, topic = %topic, "snapshot event published");
            }
            Err(e) => {
                warn!(
                    camera = %camera.name,
                    topic = %topic,
                    error = %e,
                    "failed to publish snapshot event"
                );
            }
        }
    }
}
