use octolight_common::LightMessage;
use rumqttc::{AsyncClient, QoS};
use tracing::{debug, warn};

/// Pushes light state changes to connected UI clients.
pub trait StateNotifier: Send + Sync {
    fn notify(&self, message: LightMessage);
}

pub struct MqttNotifier {
    mqtt: AsyncClient,
    topic: String,
}

impl MqttNotifier {
    pub fn new(mqtt: AsyncClient, topic: String) -> Self {
        Self { mqtt, topic }
    }
}

impl StateNotifier for MqttNotifier {
    fn notify(&self, message: LightMessage) {
        let body = match serde_json::to_vec(&message) {
            Ok(body) => body,
            Err(err) => {
                warn!("light state serialization failed: {err}");
                return;
            }
        };

        match self
            .mqtt
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, true, body)
        {
            Ok(()) => debug!(
                topic = %self.topic,
                is_light_on = message.is_light_on,
                "published light state"
            ),
            Err(err) => warn!("light state publish failed: {err}"),
        }
    }
}
