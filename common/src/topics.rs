use serde::Serialize;

use crate::config::TopicConfig;

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub base: String,
    pub light: String,
    pub availability: String,
    pub phase: String,
    pub status: String,
    discovery_prefix: String,
    node_id: String,
}

impl Topics {
    pub fn new(config: &TopicConfig, client_id: &str) -> Self {
        let base = config.base.clone();
        Self {
            availability: format!("{base}/availability"),
            phase: format!("{base}/phase"),
            status: format!("{base}/status"),
            light: config.light.clone(),
            discovery_prefix: config.discovery_prefix.clone(),
            node_id: node_id(client_id),
            base,
        }
    }

    pub fn discovery_topic(&self, object_id: &str) -> String {
        format!(
            "{}/sensor/{}/{}/config",
            self.discovery_prefix, self.node_id, object_id
        )
    }

    /// Retained discovery descriptors for the fake-time, phase and brightness sensors.
    pub fn discovery_messages(&self) -> Vec<(String, DiscoveryDescriptor)> {
        let device = DiscoveryDevice {
            identifiers: vec![self.node_id.clone()],
            name: "Daylight Controller".to_string(),
            model: "compressed daylight replay",
        };

        let sensor = |object_id: &str, name: &str, state_topic: &str| DiscoveryDescriptor {
            name: name.to_string(),
            unique_id: format!("{}_{}", self.node_id, object_id),
            state_topic: state_topic.to_string(),
            availability_topic: self.availability.clone(),
            icon: "mdi:weather-sunset",
            device_class: None,
            value_template: None,
            device: device.clone(),
        };

        let fake_time = DiscoveryDescriptor {
            icon: "mdi:calendar-clock",
            device_class: Some("timestamp"),
            ..sensor("fake_time", "Fake Time", &self.base)
        };
        let phase = DiscoveryDescriptor {
            icon: "mdi:sleep",
            ..sensor("phase", "Phase", &self.phase)
        };
        let brightness = DiscoveryDescriptor {
            icon: "mdi:brightness-6",
            value_template: Some("{{ value_json.brightness }}"),
            ..sensor("brightness", "Brightness", &self.status)
        };

        [
            ("fake_time", fake_time),
            ("phase", phase),
            ("brightness", brightness),
        ]
        .into_iter()
        .map(|(object_id, descriptor)| (self.discovery_topic(object_id), descriptor))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryDevice {
    pub identifiers: Vec<String>,
    pub name: String,
    pub model: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryDescriptor {
    pub name: String,
    pub unique_id: String,
    pub state_topic: String,
    pub availability_topic: String,
    pub icon: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<&'static str>,
    pub device: DiscoveryDevice,
}

fn node_id(client_id: &str) -> String {
    let id: String = client_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if id.is_empty() {
        "daylight".to_string()
    } else {
        id
    }
}
