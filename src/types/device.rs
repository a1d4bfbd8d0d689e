//! Device identity, current state, and history points.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open mapping of state keys to JSON scalars, as reported by devices.
pub type StateMap = serde_json::Map<String, Value>;

/// The eight device types the fleet reports as.
///
/// Wire names match the topic payloads and the UI's type selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "TEMP_HUMI")]
    TempHumi,
    #[serde(rename = "LIGHT")]
    Light,
    #[serde(rename = "PRESSURE")]
    Pressure,
    #[serde(rename = "LAMP_SWITCH")]
    LampSwitch,
    #[serde(rename = "AC_SWITCH")]
    AcSwitch,
    #[serde(rename = "PIR")]
    Pir,
    #[serde(rename = "FAN_SWITCH")]
    FanSwitch,
    #[serde(rename = "SMOKE")]
    Smoke,
}

impl DeviceType {
    /// All known types, in UI display order.
    pub const ALL: [DeviceType; 8] = [
        DeviceType::TempHumi,
        DeviceType::Light,
        DeviceType::Pressure,
        DeviceType::LampSwitch,
        DeviceType::AcSwitch,
        DeviceType::Pir,
        DeviceType::FanSwitch,
        DeviceType::Smoke,
    ];

    /// Wire value (`TEMP_HUMI`, `LAMP_SWITCH`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::TempHumi => "TEMP_HUMI",
            DeviceType::Light => "LIGHT",
            DeviceType::Pressure => "PRESSURE",
            DeviceType::LampSwitch => "LAMP_SWITCH",
            DeviceType::AcSwitch => "AC_SWITCH",
            DeviceType::Pir => "PIR",
            DeviceType::FanSwitch => "FAN_SWITCH",
            DeviceType::Smoke => "SMOKE",
        }
    }

    /// Human-readable label for type pickers.
    pub fn label(self) -> &'static str {
        match self {
            DeviceType::TempHumi => "Temperature & humidity sensor",
            DeviceType::Light => "Light sensor",
            DeviceType::Pressure => "Pressure sensor",
            DeviceType::LampSwitch => "Lamp switch",
            DeviceType::AcSwitch => "Air conditioner",
            DeviceType::Pir => "Motion sensor",
            DeviceType::FanSwitch => "Fan switch",
            DeviceType::Smoke => "Smoke detector",
        }
    }

    /// Switch types whose on-time is worth accounting as runtime hours.
    pub fn is_runtime_trackable(self) -> bool {
        matches!(
            self,
            DeviceType::LampSwitch | DeviceType::FanSwitch | DeviceType::AcSwitch
        )
    }

    /// Pure sensor types (no actuation, idle power draw only).
    pub fn is_sensor(self) -> bool {
        matches!(
            self,
            DeviceType::TempHumi
                | DeviceType::Light
                | DeviceType::Pressure
                | DeviceType::Pir
                | DeviceType::Smoke
        )
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered device and its authoritative current state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub owner: Option<u64>,
    /// Latest reported values. Never null; an unreported device holds `{}`.
    #[serde(default)]
    pub current_state: StateMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Key-level overwrite of `patch` into `current_state` (not a deep merge).
    pub fn merge_state(&mut self, patch: &StateMap) {
        for (key, value) in patch {
            self.current_state.insert(key.clone(), value.clone());
        }
    }

    /// Read a state key as a boolean, treating a missing key as `false`.
    pub fn state_bool(&self, key: &str) -> bool {
        self.current_state
            .get(key)
            .map(json_truthy)
            .unwrap_or(false)
    }

    /// Advance `updated_at` to now, never moving backwards.
    ///
    /// The fan-out's device signature is `count|max(updated_at)`, so a stalled
    /// clock must not produce an unchanged timestamp on a real mutation.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::milliseconds(1)
        };
    }

    /// Whether `uid` may see this device. Admins see everything.
    pub fn visible_to(&self, uid: Option<u64>, admin: bool) -> bool {
        admin || self.is_public || (uid.is_some() && self.owner == uid)
    }
}

/// A single history point, exactly as received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceData {
    pub device_id: u64,
    pub timestamp: DateTime<Utc>,
    pub data: StateMap,
}

/// JSON truthiness for state values: `true`, nonzero numbers, and the
/// strings "true"/"1"/"on" count as true.
pub fn json_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => {
            let s = s.to_ascii_lowercase();
            s == "true" || s == "1" || s == "on"
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(pairs: &[(&str, Value)]) -> StateMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn test_device() -> Device {
        Device {
            id: 1,
            name: "Living room AC".to_string(),
            device_type: DeviceType::AcSwitch,
            location: "living room".to_string(),
            is_online: false,
            is_public: false,
            owner: Some(7),
            current_state: StateMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_device_type_wire_names_round_trip() {
        for ty in DeviceType::ALL {
            let s = serde_json::to_string(&ty).unwrap();
            assert_eq!(s, format!("\"{}\"", ty.as_str()));
            let back: DeviceType = serde_json::from_str(&s).unwrap();
            assert_eq!(back, ty);
        }
    }

    #[test]
    fn test_merge_state_is_key_level_overwrite() {
        let mut device = test_device();
        device.current_state = state(&[("on", json!(true)), ("temp", json!(26))]);

        device.merge_state(&state(&[("temp", json!(22)), ("speed", json!(2))]));

        assert_eq!(device.current_state["on"], json!(true));
        assert_eq!(device.current_state["temp"], json!(22));
        assert_eq!(device.current_state["speed"], json!(2));
    }

    #[test]
    fn test_touch_always_advances() {
        let mut device = test_device();
        device.updated_at = Utc::now() + Duration::hours(1); // clock skew
        let before = device.updated_at;
        device.touch();
        assert!(device.updated_at > before);
    }

    #[test]
    fn test_visibility() {
        let device = test_device();
        assert!(device.visible_to(Some(7), false));
        assert!(!device.visible_to(Some(8), false));
        assert!(device.visible_to(None, true));

        let mut public = test_device();
        public.is_public = true;
        assert!(public.visible_to(Some(8), false));
    }

    #[test]
    fn test_json_truthy() {
        assert!(json_truthy(&json!(true)));
        assert!(json_truthy(&json!(1)));
        assert!(json_truthy(&json!("on")));
        assert!(!json_truthy(&json!(false)));
        assert!(!json_truthy(&json!(0)));
        assert!(!json_truthy(&json!("off")));
        assert!(!json_truthy(&json!(null)));
    }
}
