//! The per-message ingestion path.
//!
//! One task consumes the bus channel serially, which preserves per-device
//! ordering without per-device locks. Every failure is recovered locally:
//! a malformed message costs a WARN log row, never the loop.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::{self, MailTransport};
use crate::bus::{BusMessage, CommandPublisher};
use crate::scenes;
use crate::store::Store;
use crate::types::device::json_truthy;
use crate::types::{Device, DeviceType, LogLevel, LogSource, StateMap};

/// Ingress topic suffixes the gateway understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    State,
    Lwt,
    Power,
}

/// A decoded `<prefix>/<device_id>/<suffix>` topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub device_id: u64,
    pub kind: TopicKind,
}

impl ParsedTopic {
    /// Split a topic into its three segments. Returns `None` (caller logs)
    /// for short topics, non-integer device ids, and unknown suffixes.
    pub fn parse(topic: &str) -> Option<Self> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 3 {
            return None;
        }
        let device_id: u64 = parts[1].parse().ok()?;
        let kind = match parts[2] {
            "state" => TopicKind::State,
            "lwt" => TopicKind::Lwt,
            "power" => TopicKind::Power,
            _ => return None,
        };
        Some(Self { device_id, kind })
    }
}

/// The telemetry gateway. Owns the serial ingestion loop.
pub struct Gateway {
    store: Store,
    publisher: Arc<dyn CommandPublisher>,
    mailer: Arc<dyn MailTransport>,
}

impl Gateway {
    pub fn new(
        store: Store,
        publisher: Arc<dyn CommandPublisher>,
        mailer: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            store,
            publisher,
            mailer,
        }
    }

    /// Consume bus messages until the channel closes or shutdown is signaled.
    pub async fn run(
        &self,
        mut messages: mpsc::Receiver<BusMessage>,
        cancel_token: CancellationToken,
    ) {
        info!("telemetry gateway started");
        loop {
            let message = tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("gateway shutdown signal received");
                    break;
                }
                msg = messages.recv() => match msg {
                    Some(m) => m,
                    None => {
                        warn!("bus channel closed — gateway stopping");
                        break;
                    }
                },
            };

            self.handle_message(&message).await;
        }
    }

    /// Process one message. Never propagates an error; the loop must survive
    /// any single bad message.
    pub async fn handle_message(&self, message: &BusMessage) {
        let Some(parsed) = ParsedTopic::parse(&message.topic) else {
            self.drop_with_warn(&message.topic, "unparseable topic");
            return;
        };

        let device = match self.store.get_device(parsed.device_id) {
            Ok(Some(device)) => device,
            Ok(None) => {
                self.drop_with_warn(
                    &message.topic,
                    &format!("unknown device id {}", parsed.device_id),
                );
                return;
            }
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "device lookup failed");
                return;
            }
        };

        match parsed.kind {
            TopicKind::Lwt => self.handle_lwt(device, message),
            TopicKind::State => self.handle_state(device, message).await,
            TopicKind::Power => self.handle_power(device, message),
        }
    }

    /// LWT transitions flip `is_online` only; they never reach the engines.
    fn handle_lwt(&self, mut device: Device, message: &BusMessage) {
        let online = !is_offline_payload(&message.payload);
        device.is_online = online;
        device.touch();
        if let Err(e) = self.store.put_device(&device) {
            warn!(device = device.id, error = %e, "failed to persist lwt transition");
            return;
        }

        let (level, verb) = if online {
            (LogLevel::Info, "online")
        } else {
            (LogLevel::Warn, "offline")
        };
        self.log(
            level,
            format!("Device {}({}) is {}", device.name, device.id, verb),
            Some(json!({"topic": message.topic})),
        );
    }

    /// State reports: merge, persist, record history, then fan out to the
    /// rule and alert engines in order.
    async fn handle_state(&self, mut device: Device, message: &BusMessage) {
        let Some(payload) = decode_object(&message.payload) else {
            self.drop_with_warn(&message.topic, "payload is not a JSON object");
            return;
        };

        device.merge_state(&payload);
        device.is_online = true;
        device.touch();
        if let Err(e) = self.store.put_device(&device) {
            warn!(device = device.id, error = %e, "failed to persist state");
            return;
        }
        if let Err(e) = self.store.append_point(device.id, Utc::now(), &payload) {
            warn!(device = device.id, error = %e, "failed to append history point");
        }

        self.log(
            LogLevel::Info,
            format!(
                "Device {}({}) state updated: {}",
                device.name,
                device.id,
                summarize_state(&payload)
            ),
            Some(json!({"topic": message.topic, "payload": Value::Object(payload.clone())})),
        );

        // Engine fan-out. Each stage is isolated: a failing stage is logged
        // and the remaining stages still run.
        if let Err(e) =
            scenes::evaluate_report(&self.store, self.publisher.as_ref(), &device, &payload).await
        {
            warn!(device = device.id, error = %e, "scene rule evaluation failed");
        }

        for (field, value) in &payload {
            if device.device_type == DeviceType::Smoke && field == "smoke" {
                continue; // handled as a boolean alert below
            }
            let Some(numeric) = value.as_f64() else {
                continue;
            };
            if let Err(e) = alerts::send_alerts_for_value(
                &self.store,
                self.mailer.as_ref(),
                &device,
                field,
                numeric,
            )
            .await
            {
                warn!(device = device.id, field = %field, error = %e, "email alert evaluation failed");
            }
        }

        if device.device_type == DeviceType::Smoke {
            if let Some(smoke) = payload.get("smoke") {
                let value = if json_truthy(smoke) { 1.0 } else { 0.0 };
                if let Err(e) = alerts::send_alerts_for_value(
                    &self.store,
                    self.mailer.as_ref(),
                    &device,
                    "smoke",
                    value,
                )
                .await
                {
                    warn!(device = device.id, error = %e, "smoke alert evaluation failed");
                }
            }
        }
    }

    /// Power telemetry is merged and recorded but carries no user-facing
    /// state transition, so it skips both the SystemLog row and the engines.
    fn handle_power(&self, mut device: Device, message: &BusMessage) {
        let Some(payload) = decode_object(&message.payload) else {
            self.drop_with_warn(&message.topic, "payload is not a JSON object");
            return;
        };

        device.merge_state(&payload);
        device.is_online = true;
        device.touch();
        if let Err(e) = self.store.put_device(&device) {
            warn!(device = device.id, error = %e, "failed to persist power telemetry");
            return;
        }
        if let Err(e) = self.store.append_point(device.id, Utc::now(), &payload) {
            warn!(device = device.id, error = %e, "failed to append power point");
        }
        debug!(device = device.id, "power telemetry merged");
    }

    fn drop_with_warn(&self, topic: &str, reason: &str) {
        warn!(topic = %topic, reason = %reason, "dropping message");
        self.log(
            LogLevel::Warn,
            format!("Dropped message on {topic}: {reason}"),
            None,
        );
    }

    fn log(&self, level: LogLevel, message: String, data: Option<Value>) {
        if let Err(e) = self
            .store
            .append_log(level, LogSource::MqttGateway, message, data, None)
        {
            warn!(error = %e, "failed to append gateway log row");
        }
    }
}

/// Decode a payload that must be a JSON object.
fn decode_object(payload: &[u8]) -> Option<StateMap> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// LWT payloads may be JSON or a bare string. Only a case-insensitive
/// `offline` / `0` / `false` marks the device offline.
fn is_offline_payload(payload: &[u8]) -> bool {
    let text = match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => {
            let field = map.get("online").or_else(|| map.get("status"));
            match field {
                Some(v) => scalar_to_string(v),
                None => return false,
            }
        }
        Ok(value) => scalar_to_string(&value),
        Err(_) => String::from_utf8_lossy(payload).to_string(),
    };

    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "offline" | "0" | "false"
    )
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Human-readable one-liner over the well-known state keys; unknown keys are
/// appended verbatim.
pub fn summarize_state(state: &StateMap) -> String {
    let mut parts = Vec::with_capacity(state.len());
    for (key, value) in state {
        let part = match key.as_str() {
            "temp" => format!("temp {}°C", render(value)),
            "humi" => format!("humi {}%", render(value)),
            "on" => {
                if json_truthy(value) { "on".to_string() } else { "off".to_string() }
            }
            "speed" => format!("speed {}", render(value)),
            "light" => format!("light {}lx", render(value)),
            "pressure" => format!("pressure {}hPa", render(value)),
            "smoke" => {
                if json_truthy(value) { "smoke detected".to_string() } else { "smoke clear".to_string() }
            }
            "motion" => {
                if json_truthy(value) { "motion".to_string() } else { "no motion".to_string() }
            }
            "power_w" => format!("power {}W", render(value)),
            _ => format!("{key}={}", render(value)),
        };
        parts.push(part);
    }
    if parts.is_empty() {
        "empty report".to_string()
    } else {
        parts.join(", ")
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
