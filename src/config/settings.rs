//! Configuration structures and the TOML/env loading logic.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// Top-level configuration for the hearthd process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeConfig {
    pub server: ServerConfig,
    pub mqtt: MqttConfig,
    pub energy: EnergyConfig,
    pub realtime: RealtimeConfig,
    pub alerts: AlertConfig,
    pub smtp: SmtpConfig,
}

/// HTTP server and storage paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub data_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

/// MQTT broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub keepalive_secs: u64,
    pub topic_prefix: String,
    pub use_tls: bool,
    pub ca_certs: Option<String>,
    pub certfile: Option<String>,
    pub keyfile: Option<String>,
    pub tls_insecure: bool,
    pub client_id_prefix: String,
    pub client_id_suffix_len: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            keepalive_secs: 60,
            topic_prefix: "home".to_string(),
            use_tls: false,
            ca_certs: None,
            certfile: None,
            keyfile: None,
            tls_insecure: false,
            client_id_prefix: "hearthd".to_string(),
            client_id_suffix_len: 8,
        }
    }
}

/// Tariff and per-type power estimation constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    pub price_per_kwh: f64,
    pub power_profile: PowerProfile,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            price_per_kwh: 0.56,
            power_profile: PowerProfile::default(),
        }
    }
}

/// Wattage model for devices that do not report measured power.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerProfile {
    pub lamp_on_w: f64,
    pub fan_speed_1_w: f64,
    pub fan_speed_2_w: f64,
    pub fan_speed_3_w: f64,
    pub ac_base_w: f64,
    pub ac_temp_step_w: f64,
    pub ac_min_w: f64,
    pub ac_max_w: f64,
    pub sensor_idle_w: f64,
}

impl Default for PowerProfile {
    fn default() -> Self {
        Self {
            lamp_on_w: 9.0,
            fan_speed_1_w: 30.0,
            fan_speed_2_w: 45.0,
            fan_speed_3_w: 60.0,
            ac_base_w: 900.0,
            ac_temp_step_w: 25.0,
            ac_min_w: 500.0,
            ac_max_w: 1500.0,
            sensor_idle_w: 0.5,
        }
    }
}

/// Realtime stream ticket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Seconds a stream ticket stays valid. Clamped to >= 5 at load time.
    pub stream_token_ttl_seconds: u64,
    /// Signing secret. Empty means "generate a random one at startup",
    /// which invalidates outstanding tickets across restarts.
    pub secret: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            stream_token_ttl_seconds: 30,
            secret: String::new(),
        }
    }
}

/// Alert engine knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Default temperature threshold offered when creating HIGH_TEMP rules.
    pub temp_threshold: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { temp_threshold: 35.0 }
    }
}

/// Outbound SMTP settings for the email alert engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub use_tls: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 25,
            username: None,
            password: None,
            from_address: "hearthd@localhost".to_string(),
            use_tls: false,
        }
    }
}

impl HomeConfig {
    /// Load configuration: explicit path from `HEARTHD_CONFIG`, else
    /// `hearthd.toml` in the working directory, else defaults. Environment
    /// overrides are applied on top in all cases.
    pub fn load() -> Self {
        let mut config = if let Ok(path) = std::env::var("HEARTHD_CONFIG") {
            Self::from_file(&path).unwrap_or_else(|| {
                warn!(path = %path, "HEARTHD_CONFIG points at an unreadable file — using defaults");
                Self::default()
            })
        } else if let Some(cfg) = Self::from_file("hearthd.toml") {
            cfg
        } else {
            info!("no hearthd.toml found — using built-in defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.realtime.stream_token_ttl_seconds =
            config.realtime.stream_token_ttl_seconds.max(5);
        config
    }

    /// Parse a TOML file, returning `None` if it is missing or malformed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Option<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).ok()?;
        match toml::from_str(&raw) {
            Ok(cfg) => {
                info!(path = %path.as_ref().display(), "configuration loaded");
                Some(cfg)
            }
            Err(e) => {
                warn!(path = %path.as_ref().display(), error = %e, "failed to parse config file");
                None
            }
        }
    }

    /// Deployment env vars take precedence over the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Ok(port) = std::env::var("MQTT_PORT") {
            match port.parse() {
                Ok(p) => self.mqtt.port = p,
                Err(_) => warn!(value = %port, "ignoring non-numeric MQTT_PORT"),
            }
        }
        if let Ok(username) = std::env::var("MQTT_USERNAME") {
            self.mqtt.username = username;
        }
        if let Ok(password) = std::env::var("MQTT_PASSWORD") {
            self.mqtt.password = password;
        }
        if let Ok(prefix) = std::env::var("MQTT_TOPIC_PREFIX") {
            self.mqtt.topic_prefix = prefix;
        }
        if let Ok(price) = std::env::var("ENERGY_PRICE_PER_KWH") {
            match price.parse() {
                Ok(p) => self.energy.price_per_kwh = p,
                Err(_) => warn!(value = %price, "ignoring non-numeric ENERGY_PRICE_PER_KWH"),
            }
        }
        if let Ok(ttl) = std::env::var("STREAM_TOKEN_TTL_SECONDS") {
            match ttl.parse() {
                Ok(t) => self.realtime.stream_token_ttl_seconds = t,
                Err(_) => warn!(value = %ttl, "ignoring non-numeric STREAM_TOKEN_TTL_SECONDS"),
            }
        }
        if let Ok(threshold) = std::env::var("ALERT_TEMP_THRESHOLD") {
            match threshold.parse() {
                Ok(t) => self.alerts.temp_threshold = t,
                Err(_) => warn!(value = %threshold, "ignoring non-numeric ALERT_TEMP_THRESHOLD"),
            }
        }
    }
}
