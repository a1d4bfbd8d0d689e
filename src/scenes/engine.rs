//! Rule evaluation and action dispatch.
//!
//! Per incoming report: select enabled rules on the trigger device, apply
//! the debounce window, test the firing predicate, then execute the action
//! against the actuator. The persisted state change commits before the bus
//! publish so a crash in between leaves a recoverable state; the device
//! reconciles on its next report.

use chrono::{Local, NaiveTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::bus::CommandPublisher;
use crate::store::{Store, StoreError};
use crate::types::{ActionKind, Device, SceneRule, StateMap, TriggerKind};
use crate::types::{LogLevel, LogSource};

/// Evaluate all rules triggered by `device`'s fresh report. Returns the
/// number of rules that fired.
pub async fn evaluate_report(
    store: &Store,
    publisher: &dyn CommandPublisher,
    device: &Device,
    payload: &StateMap,
) -> Result<usize, StoreError> {
    let rules = store.scene_rules_for_trigger(device.id)?;
    if rules.is_empty() {
        return Ok(0);
    }

    let now = Utc::now();
    let now_local = Local::now().time();
    let mut fired = 0;

    for rule in rules {
        if let Some(last) = rule.last_triggered_at {
            let elapsed = (now - last).num_seconds();
            if elapsed < rule.debounce_seconds {
                debug!(rule = rule.id, elapsed, "rule inside debounce window — skipping");
                continue;
            }
        }

        let state_lookup = |id: u64| store.get_device(id).ok().flatten();
        if !rule_matches(&rule, payload, &state_lookup, now_local) {
            continue;
        }

        // Action gating: an offline actuator skips the rule silently and
        // leaves the debounce window unconsumed.
        let mut actuator = match store.get_device(rule.action_device)? {
            Some(d) if d.is_online => d,
            _ => {
                debug!(rule = rule.id, actuator = rule.action_device, "actuator offline — skipping");
                continue;
            }
        };

        let delta = action_delta(&rule.action, &actuator);

        // 1. Persist the new actuator state.
        actuator.merge_state(&delta);
        actuator.touch();
        store.put_device(&actuator)?;

        // 2. Publish the command.
        if let Err(e) = publisher.publish_command(actuator.id, &delta).await {
            warn!(rule = rule.id, actuator = actuator.id, error = %e, "command publish failed");
            store.append_log(
                LogLevel::Error,
                LogSource::SceneRule,
                format!("Failed to publish command for rule '{}': {e}", rule.name),
                Some(json!({"rule_id": rule.id, "action_device_id": actuator.id})),
                Some(rule.owner),
            )?;
        }

        // 3. Consume the debounce window.
        store.stamp_scene_rule_triggered(rule.id, now)?;

        // 4. Audit row.
        store.append_log(
            LogLevel::Info,
            LogSource::SceneRule,
            format!(
                "Scene rule '{}' fired: {} -> {}",
                rule.name, device.name, actuator.name
            ),
            Some(json!({
                "rule_id": rule.id,
                "trigger_device_id": device.id,
                "action_device_id": actuator.id,
                "action_payload": Value::Object(delta),
            })),
            Some(rule.owner),
        )?;

        fired += 1;
    }

    Ok(fired)
}

/// Whether `rule`'s firing predicate holds for this payload.
///
/// `state_lookup` resolves the optional TIME_STATE companion device;
/// `now_local` is injected so the time window is testable.
pub fn rule_matches(
    rule: &SceneRule,
    payload: &StateMap,
    state_lookup: &dyn Fn(u64) -> Option<Device>,
    now_local: NaiveTime,
) -> bool {
    match &rule.trigger {
        TriggerKind::ThresholdAbove { threshold } => {
            numeric_field(payload, &rule.trigger_field).is_some_and(|v| v > *threshold)
        }
        TriggerKind::ThresholdBelow { threshold } => {
            numeric_field(payload, &rule.trigger_field).is_some_and(|v| v < *threshold)
        }
        TriggerKind::RangeOut { min, max } => {
            numeric_field(payload, &rule.trigger_field).is_some_and(|v| v < *min || v > *max)
        }
        TriggerKind::TimeState {
            start,
            end,
            state_device,
            state_value,
        } => {
            if !time_in_window(now_local, *start, *end) {
                return false;
            }
            match state_device {
                None => true,
                Some(id) => match state_lookup(*id) {
                    Some(companion) => state_value
                        .iter()
                        .all(|(key, expected)| {
                            companion
                                .current_state
                                .get(key)
                                .is_some_and(|actual| values_equal(actual, expected))
                        }),
                    None => false,
                },
            }
        }
    }
}

/// Inclusive local-time window test; a window with `start > end` wraps
/// midnight.
pub fn time_in_window(t: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        t >= start && t <= end
    } else {
        t >= start || t <= end
    }
}

/// The state delta an action applies to the actuator. Also the exact JSON
/// body published to `<prefix>/<id>/cmd`.
pub fn action_delta(action: &ActionKind, actuator: &Device) -> StateMap {
    let mut delta = StateMap::new();
    match action {
        ActionKind::Toggle => {
            delta.insert("on".to_string(), json!(!actuator.state_bool("on")));
        }
        ActionKind::TurnOn => {
            delta.insert("on".to_string(), json!(true));
        }
        ActionKind::TurnOff => {
            delta.insert("on".to_string(), json!(false));
        }
        ActionKind::SetTemp(temp) => {
            delta.insert("temp".to_string(), json!(temp));
            delta.insert("on".to_string(), json!(true));
        }
        ActionKind::SetFanSpeed(speed) => {
            delta.insert("speed".to_string(), json!(speed));
            delta.insert("on".to_string(), json!(true));
        }
    }
    delta
}

fn numeric_field(payload: &StateMap, field: &str) -> Option<f64> {
    payload.get(field).and_then(Value::as_f64)
}

/// Loose scalar equality: numbers compare as f64, everything else exactly.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}
