//! Alert rule matching and mail dispatch.
//!
//! Numeric thresholds are inclusive (`>=` / `<=`) — deliberately looser than
//! the scene engine's strict comparisons. Smoke rules with no threshold fire
//! on any truthy report (threshold treated as 1.0).

use chrono::{Local, Utc};
use serde_json::json;
use tracing::warn;

use super::template::render_template;
use super::{MailTransport, OutgoingMail};
use crate::store::{Store, StoreError};
use crate::types::{Device, EmailAlertRule, LogLevel, LogSource};

/// Hard cap on rendered subject length.
const MAX_SUBJECT_CHARS: usize = 200;

/// Evaluate every enabled rule for `(device, field)` against `value`,
/// sending mail for each match. Returns the number of mails sent.
///
/// Transport failures are logged (and skip the `last_triggered_at` stamp so
/// the next matching report retries); they are not surfaced to the caller.
pub async fn send_alerts_for_value(
    store: &Store,
    mailer: &dyn MailTransport,
    device: &Device,
    field: &str,
    value: f64,
) -> Result<usize, StoreError> {
    let rules = store.email_rules_for_field(device.id, field)?;
    let mut sent = 0;

    for rule in rules {
        let threshold = match rule.trigger_value {
            Some(t) => t,
            None if field == "smoke" => 1.0,
            None => continue,
        };

        let triggered = if rule.trigger_above {
            value >= threshold
        } else {
            value <= threshold
        };
        if !triggered {
            continue;
        }

        if rule.recipients.is_empty() {
            warn!(rule = rule.id, "alert rule has no recipients — skipping");
            store.append_log(
                LogLevel::Warn,
                LogSource::EmailAlert,
                format!("Alert rule '{}' has no recipients", rule.name),
                Some(json!({"rule_id": rule.id})),
                None,
            )?;
            continue;
        }

        let mail = build_mail(&rule, device, value);
        match mailer.send(&mail).await {
            Ok(()) => {
                store.stamp_email_rule_triggered(rule.id, Utc::now())?;
                store.append_log(
                    LogLevel::Info,
                    LogSource::EmailAlert,
                    format!(
                        "Alert email sent: {} -> {}",
                        rule.name,
                        recipients_preview(&rule.recipients)
                    ),
                    Some(json!({
                        "rule_id": rule.id,
                        "device_name": device.name,
                        "value": value,
                    })),
                    None,
                )?;
                sent += 1;
            }
            Err(e) => {
                store.append_log(
                    LogLevel::Error,
                    LogSource::EmailAlert,
                    format!("Failed to send alert email: {} - {e}", rule.name),
                    Some(json!({"rule_id": rule.id})),
                    None,
                )?;
            }
        }
    }

    Ok(sent)
}

/// Render subject and body, falling back to the fixed defaults when a
/// template references an unknown placeholder.
fn build_mail(rule: &EmailAlertRule, device: &Device, value: f64) -> OutgoingMail {
    let time = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let vars = [
        ("preset", rule.preset.label().to_string()),
        ("device_name", device.name.clone()),
        ("value", value.to_string()),
        ("time", time.clone()),
    ];

    let subject = render_template(&rule.subject_template, &vars)
        .unwrap_or_else(|_| format!("[ALERT] {} - {}", rule.preset.label(), device.name));
    let body = render_template(&rule.body_template, &vars).unwrap_or_else(|_| {
        format!(
            "Device: {}\nCondition: {}\nValue: {}\nTime: {}",
            device.name,
            rule.preset.label(),
            value,
            time
        )
    });

    OutgoingMail {
        to: rule.recipients.clone(),
        cc: rule.cc.clone(),
        subject: subject.chars().take(MAX_SUBJECT_CHARS).collect(),
        body,
    }
}

/// First three recipients, with an ellipsis for longer lists.
fn recipients_preview(recipients: &[String]) -> String {
    let head = recipients
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    if recipients.len() > 3 {
        format!("{head}...")
    } else {
        head
    }
}
