//! Scene rule model: typed triggers, typed actions, and the draft form the
//! API accepts.
//!
//! The wire format keeps the flat field layout the UI already sends
//! (`trigger_type` + polymorphic `trigger_value` + optional time/state
//! fields), but everything is decoded into tagged variants with validated
//! constructors before it reaches the engine.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::device::StateMap;

/// Rejected rule payloads name the offending field so the UI can highlight it.
#[derive(Debug, Error, PartialEq)]
pub enum RuleValidationError {
    #[error("trigger_device: a trigger device must be selected")]
    MissingTriggerDevice,
    #[error("action_device: an action device must be selected")]
    MissingActionDevice,
    #[error("trigger_type: unknown trigger type `{0}`")]
    UnknownTriggerType(String),
    #[error("action_type: unknown action type `{0}`")]
    UnknownActionType(String),
    #[error("trigger_value: {0}")]
    BadTriggerValue(String),
    #[error("trigger_time_start: TIME_STATE rules need both a start and end time")]
    MissingTimeWindow,
    #[error("action_value: {0}")]
    BadActionValue(String),
}

/// The polymorphic `trigger_value` wire forms: a bare scalar, a
/// `{min, max}` range, or a `{value}` wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TriggerValue {
    Scalar(f64),
    Range { min: f64, max: f64 },
    Wrapped { value: f64 },
}

impl TriggerValue {
    /// Scalar reading, accepting both the bare and `{value}` forms.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            TriggerValue::Scalar(v) | TriggerValue::Wrapped { value: v } => Some(*v),
            TriggerValue::Range { .. } => None,
        }
    }

    pub fn as_range(&self) -> Option<(f64, f64)> {
        match self {
            TriggerValue::Range { min, max } => Some((*min, *max)),
            _ => None,
        }
    }
}

/// A validated trigger condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger_type")]
pub enum TriggerKind {
    /// Fires when the watched field is strictly above the threshold.
    #[serde(rename = "THRESHOLD_ABOVE")]
    ThresholdAbove { threshold: f64 },
    /// Fires when the watched field is strictly below the threshold.
    #[serde(rename = "THRESHOLD_BELOW")]
    ThresholdBelow { threshold: f64 },
    /// Fires when the watched field falls strictly outside `[min, max]`.
    #[serde(rename = "RANGE_OUT")]
    RangeOut { min: f64, max: f64 },
    /// Fires inside a (possibly midnight-wrapping) local time window, with an
    /// optional companion device whose state must match `state_value`.
    #[serde(rename = "TIME_STATE")]
    TimeState {
        start: NaiveTime,
        end: NaiveTime,
        #[serde(default)]
        state_device: Option<u64>,
        #[serde(default)]
        state_value: StateMap,
    },
}

impl TriggerKind {
    /// Wire name, used in conflict messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            TriggerKind::ThresholdAbove { .. } => "THRESHOLD_ABOVE",
            TriggerKind::ThresholdBelow { .. } => "THRESHOLD_BELOW",
            TriggerKind::RangeOut { .. } => "RANGE_OUT",
            TriggerKind::TimeState { .. } => "TIME_STATE",
        }
    }

    /// The open intervals on the trigger field where this trigger fires.
    /// `None` for TIME_STATE, which is not a numeric predicate.
    pub fn firing_intervals(&self) -> Option<Vec<(f64, f64)>> {
        match *self {
            TriggerKind::ThresholdAbove { threshold } => {
                Some(vec![(threshold, f64::INFINITY)])
            }
            TriggerKind::ThresholdBelow { threshold } => {
                Some(vec![(f64::NEG_INFINITY, threshold)])
            }
            TriggerKind::RangeOut { min, max } => Some(vec![
                (f64::NEG_INFINITY, min),
                (max, f64::INFINITY),
            ]),
            TriggerKind::TimeState { .. } => None,
        }
    }
}

/// A validated action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", content = "action_value")]
pub enum ActionKind {
    #[serde(rename = "TOGGLE")]
    Toggle,
    #[serde(rename = "TURN_ON")]
    TurnOn,
    #[serde(rename = "TURN_OFF")]
    TurnOff,
    #[serde(rename = "SET_TEMP")]
    SetTemp(f64),
    #[serde(rename = "SET_FAN_SPEED")]
    SetFanSpeed(i64),
}

impl ActionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActionKind::Toggle => "TOGGLE",
            ActionKind::TurnOn => "TURN_ON",
            ActionKind::TurnOff => "TURN_OFF",
            ActionKind::SetTemp(_) => "SET_TEMP",
            ActionKind::SetFanSpeed(_) => "SET_FAN_SPEED",
        }
    }

    /// Canonical fingerprint used by conflict detection.
    pub fn signature(&self) -> ActionSignature {
        match *self {
            ActionKind::Toggle => ActionSignature {
                toggle: true,
                desired_on: None,
                temp: None,
                speed: None,
            },
            ActionKind::TurnOn => ActionSignature {
                toggle: false,
                desired_on: Some(true),
                temp: None,
                speed: None,
            },
            ActionKind::TurnOff => ActionSignature {
                toggle: false,
                desired_on: Some(false),
                temp: None,
                speed: None,
            },
            ActionKind::SetTemp(temp) => ActionSignature {
                toggle: false,
                desired_on: Some(true),
                temp: Some(temp),
                speed: None,
            },
            ActionKind::SetFanSpeed(speed) => ActionSignature {
                toggle: false,
                desired_on: Some(true),
                temp: None,
                speed: Some(speed),
            },
        }
    }
}

/// Canonical action fingerprint: `{toggle, desired_on, temp, speed}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionSignature {
    pub toggle: bool,
    pub desired_on: Option<bool>,
    pub temp: Option<f64>,
    pub speed: Option<i64>,
}

/// A stored scene rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneRule {
    pub id: u64,
    pub name: String,
    pub enabled: bool,
    pub owner: u64,
    pub trigger_device: u64,
    /// Watched field for numeric triggers (`temp`, `humi`, ...). Empty for
    /// TIME_STATE rules.
    #[serde(default)]
    pub trigger_field: String,
    #[serde(flatten)]
    pub trigger: TriggerKind,
    pub action_device: u64,
    #[serde(flatten)]
    pub action: ActionKind,
    pub debounce_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// The flat rule payload the API accepts for create/update.
#[derive(Debug, Clone, Deserialize)]
pub struct SceneRuleDraft {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub trigger_type: String,
    pub trigger_device: u64,
    #[serde(default)]
    pub trigger_field: String,
    #[serde(default)]
    pub trigger_value: Option<TriggerValue>,
    #[serde(default)]
    pub trigger_time_start: Option<NaiveTime>,
    #[serde(default)]
    pub trigger_time_end: Option<NaiveTime>,
    #[serde(default)]
    pub trigger_state_device: Option<u64>,
    #[serde(default)]
    pub trigger_state_value: Option<StateMap>,
    pub action_device: u64,
    pub action_type: String,
    #[serde(default)]
    pub action_value: Option<Value>,
    #[serde(default = "default_debounce")]
    pub debounce_seconds: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_debounce() -> i64 {
    60
}

impl SceneRuleDraft {
    /// Re-flatten a stored rule into its draft form, so partial updates can
    /// overlay changed fields before re-validating the whole rule.
    pub fn from_rule(rule: &SceneRule) -> Self {
        let mut draft = Self {
            name: rule.name.clone(),
            enabled: rule.enabled,
            trigger_type: rule.trigger.type_name().to_string(),
            trigger_device: rule.trigger_device,
            trigger_field: rule.trigger_field.clone(),
            trigger_value: None,
            trigger_time_start: None,
            trigger_time_end: None,
            trigger_state_device: None,
            trigger_state_value: None,
            action_device: rule.action_device,
            action_type: rule.action.type_name().to_string(),
            action_value: None,
            debounce_seconds: rule.debounce_seconds,
        };

        match &rule.trigger {
            TriggerKind::ThresholdAbove { threshold }
            | TriggerKind::ThresholdBelow { threshold } => {
                draft.trigger_value = Some(TriggerValue::Scalar(*threshold));
            }
            TriggerKind::RangeOut { min, max } => {
                draft.trigger_value = Some(TriggerValue::Range {
                    min: *min,
                    max: *max,
                });
            }
            TriggerKind::TimeState {
                start,
                end,
                state_device,
                state_value,
            } => {
                draft.trigger_time_start = Some(*start);
                draft.trigger_time_end = Some(*end);
                draft.trigger_state_device = *state_device;
                draft.trigger_state_value = Some(state_value.clone());
            }
        }

        match rule.action {
            ActionKind::SetTemp(temp) => draft.action_value = Some(Value::from(temp)),
            ActionKind::SetFanSpeed(speed) => draft.action_value = Some(Value::from(speed)),
            _ => {}
        }

        draft
    }

    /// Validate the flat wire fields into typed trigger and action variants.
    pub fn validate(&self) -> Result<(TriggerKind, ActionKind), RuleValidationError> {
        if self.trigger_device == 0 {
            return Err(RuleValidationError::MissingTriggerDevice);
        }
        if self.action_device == 0 {
            return Err(RuleValidationError::MissingActionDevice);
        }

        let trigger = match self.trigger_type.as_str() {
            "THRESHOLD_ABOVE" => TriggerKind::ThresholdAbove {
                threshold: self.scalar_trigger_value()?,
            },
            "THRESHOLD_BELOW" => TriggerKind::ThresholdBelow {
                threshold: self.scalar_trigger_value()?,
            },
            "RANGE_OUT" => {
                let (min, max) = self
                    .trigger_value
                    .as_ref()
                    .and_then(TriggerValue::as_range)
                    .ok_or_else(|| {
                        RuleValidationError::BadTriggerValue(
                            "RANGE_OUT rules need a {\"min\": X, \"max\": Y} value".to_string(),
                        )
                    })?;
                if min >= max {
                    return Err(RuleValidationError::BadTriggerValue(
                        "min must be below max".to_string(),
                    ));
                }
                TriggerKind::RangeOut { min, max }
            }
            "TIME_STATE" => {
                let (start, end) = match (self.trigger_time_start, self.trigger_time_end) {
                    (Some(s), Some(e)) => (s, e),
                    _ => return Err(RuleValidationError::MissingTimeWindow),
                };
                TriggerKind::TimeState {
                    start,
                    end,
                    state_device: self.trigger_state_device.filter(|id| *id != 0),
                    state_value: self.trigger_state_value.clone().unwrap_or_default(),
                }
            }
            other => return Err(RuleValidationError::UnknownTriggerType(other.to_string())),
        };

        let action = match self.action_type.as_str() {
            "TOGGLE" => ActionKind::Toggle,
            "TURN_ON" => ActionKind::TurnOn,
            "TURN_OFF" => ActionKind::TurnOff,
            "SET_TEMP" => {
                let temp = self.action_value.as_ref().and_then(Value::as_f64).ok_or_else(
                    || {
                        RuleValidationError::BadActionValue(
                            "SET_TEMP needs a numeric temperature".to_string(),
                        )
                    },
                )?;
                ActionKind::SetTemp(temp)
            }
            "SET_FAN_SPEED" => {
                let speed = self.action_value.as_ref().and_then(Value::as_i64).ok_or_else(
                    || {
                        RuleValidationError::BadActionValue(
                            "SET_FAN_SPEED needs a speed of 1, 2 or 3".to_string(),
                        )
                    },
                )?;
                if !(1..=3).contains(&speed) {
                    return Err(RuleValidationError::BadActionValue(
                        "SET_FAN_SPEED needs a speed of 1, 2 or 3".to_string(),
                    ));
                }
                ActionKind::SetFanSpeed(speed)
            }
            other => return Err(RuleValidationError::UnknownActionType(other.to_string())),
        };

        Ok((trigger, action))
    }

    fn scalar_trigger_value(&self) -> Result<f64, RuleValidationError> {
        self.trigger_value
            .as_ref()
            .and_then(TriggerValue::as_scalar)
            .ok_or_else(|| {
                RuleValidationError::BadTriggerValue(
                    "threshold rules need a numeric value".to_string(),
                )
            })
    }
}
