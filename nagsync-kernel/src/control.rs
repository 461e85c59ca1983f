/**
 * CONTROL CHANNEL - Snapshot requests towards the upstream broker
 *
 * ROLE: asks the monitoring side for a full dump of its hosts and services.
 * The reply is not awaited here: it comes back on the response topic and is
 * routed to the importer through the engine inbox like any other frame.
 */

use rumqttc::{AsyncClient, QoS};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("request encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait ControlChannel: Send + Sync {
    /// Sends the configured snapshot request. Must not block.
    fn request_snapshot(&self) -> Result<(), ControlError>;
}

/// Publishes the snapshot request on an MQTT topic.
pub struct MqttControl {
    client: AsyncClient,
    topic: String,
    payload: String,
}

impl MqttControl {
    pub fn new(client: AsyncClient, topic: impl Into<String>, request: &serde_json::Value) -> Result<Self, ControlError> {
        Ok(Self {
            client,
            topic: topic.into(),
            payload: serde_json::to_string(request)?,
        })
    }
}

impl ControlChannel for MqttControl {
    fn request_snapshot(&self) -> Result<(), ControlError> {
        self.client
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, false, self.payload.clone())
            .map_err(|e| ControlError::Publish(e.to_string()))?;
        info!(topic = %self.topic, "snapshot requested");
        Ok(())
    }
}
