//! Telemetry gateway: decodes per-device topics from the bus, applies
//! last-will/online semantics, persists history, and hands state reports to
//! the scene rule and email alert engines.

mod ingest;

pub use ingest::{Gateway, ParsedTopic, TopicKind};

use crate::config::MqttConfig;

/// Subscription patterns the gateway registers with the bus.
pub fn ingress_patterns(config: &MqttConfig) -> Vec<String> {
    vec![
        format!("{}/+/state", config.topic_prefix),
        format!("{}/+/lwt", config.topic_prefix),
        format!("{}/+/power", config.topic_prefix),
    ]
}
