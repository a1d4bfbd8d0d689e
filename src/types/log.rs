//! Persisted system log rows, shown on the debug page and tailed by the
//! realtime fan-out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a persisted log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERROR")]
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Subsystem that produced a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSource {
    #[serde(rename = "MQTT_GATEWAY")]
    MqttGateway,
    #[serde(rename = "SCENE_RULE")]
    SceneRule,
    #[serde(rename = "EMAIL_ALERT")]
    EmailAlert,
    #[serde(rename = "SYSTEM")]
    System,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSource::MqttGateway => write!(f, "MQTT_GATEWAY"),
            LogSource::SceneRule => write!(f, "SCENE_RULE"),
            LogSource::EmailAlert => write!(f, "EMAIL_ALERT"),
            LogSource::System => write!(f, "SYSTEM"),
        }
    }
}

/// An append-only system log row.
///
/// `id` is strictly monotonic across the store's lifetime; the realtime
/// fan-out relies on this to resume tailing from `last_log_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemLog {
    pub id: u64,
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    /// Weak back-reference; rows outlive their user.
    #[serde(default)]
    pub user: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl SystemLog {
    /// Whether `uid` may see this row. Rows without a user are global.
    pub fn visible_to(&self, uid: Option<u64>, admin: bool) -> bool {
        admin || self.user.is_none() || self.user == uid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_wire_names() {
        assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"WARN\"");
        assert_eq!(
            serde_json::to_string(&LogSource::MqttGateway).unwrap(),
            "\"MQTT_GATEWAY\""
        );
    }

    #[test]
    fn test_visibility() {
        let mut row = SystemLog {
            id: 1,
            level: LogLevel::Info,
            source: LogSource::System,
            message: "boot".to_string(),
            data: None,
            user: None,
            created_at: Utc::now(),
        };
        assert!(row.visible_to(Some(3), false));

        row.user = Some(5);
        assert!(row.visible_to(Some(5), false));
        assert!(!row.visible_to(Some(3), false));
        assert!(row.visible_to(None, true));
    }
}
