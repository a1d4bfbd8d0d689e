//! Save-time conflict detection between scene rules.
//!
//! Two rules conflict when they can both fire on the same report (same
//! trigger device, overlapping trigger conditions) and then fight over the
//! same actuator (same action device, conflicting action signatures). The
//! validator rejects such saves with a structured conflict list.

use chrono::NaiveTime;
use serde::Serialize;

use crate::types::{ActionSignature, SceneRule, StateMap, TriggerKind};
use crate::types::device::json_truthy;

/// State keys treated as boolean-like when comparing TIME_STATE predicates.
pub const BOOLEAN_LIKE_KEYS: [&str; 7] =
    ["on", "motion", "pir", "value", "detected", "alarm", "smoke"];

/// One detected conflict, returned to the caller that attempted the save.
#[derive(Debug, Clone, Serialize)]
pub struct RuleConflict {
    pub rule_id: u64,
    pub rule_name: String,
    pub conflict_field: &'static str,
    pub message: String,
}

/// Check `candidate` against all `existing` rules. A rule never conflicts
/// with itself (updates pass their own stored id).
pub fn find_conflicts(candidate: &SceneRule, existing: &[SceneRule]) -> Vec<RuleConflict> {
    let mut conflicts = Vec::new();

    for other in existing {
        if other.id == candidate.id {
            continue;
        }
        if other.trigger_device != candidate.trigger_device {
            continue;
        }
        if other.action_device != candidate.action_device {
            continue;
        }
        if !triggers_overlap(candidate, other) {
            continue;
        }

        if let Some((field, reason)) =
            signature_conflict(&candidate.action.signature(), &other.action.signature())
        {
            conflicts.push(RuleConflict {
                rule_id: other.id,
                rule_name: other.name.clone(),
                conflict_field: field,
                message: format!("conflicts with rule '{}': {}", other.name, reason),
            });
        }
    }

    conflicts
}

/// Whether two rules' trigger conditions can hold simultaneously.
fn triggers_overlap(a: &SceneRule, b: &SceneRule) -> bool {
    match (&a.trigger, &b.trigger) {
        (TriggerKind::TimeState { .. }, TriggerKind::TimeState { .. }) => {
            time_state_overlap(&a.trigger, &b.trigger)
        }
        // TIME_STATE never overlaps a numeric trigger.
        (TriggerKind::TimeState { .. }, _) | (_, TriggerKind::TimeState { .. }) => false,
        _ => {
            if a.trigger_field != b.trigger_field {
                return false;
            }
            let (Some(ia), Some(ib)) = (a.trigger.firing_intervals(), b.trigger.firing_intervals())
            else {
                return false;
            };
            ia.iter().any(|x| ib.iter().any(|y| open_intervals_intersect(*x, *y)))
        }
    }
}

/// Open interval intersection: `(a1, a2) ∩ (b1, b2) ≠ ∅`.
fn open_intervals_intersect(a: (f64, f64), b: (f64, f64)) -> bool {
    a.0.max(b.0) < a.1.min(b.1)
}

fn time_state_overlap(a: &TriggerKind, b: &TriggerKind) -> bool {
    let (
        TriggerKind::TimeState {
            start: a_start,
            end: a_end,
            state_value: a_state,
            ..
        },
        TriggerKind::TimeState {
            start: b_start,
            end: b_end,
            state_value: b_state,
            ..
        },
    ) = (a, b)
    else {
        return false;
    };

    windows_intersect(*a_start, *a_end, *b_start, *b_end)
        && state_predicates_compatible(a_state, b_state)
}

/// Closed time-window intersection, unrolling midnight wraps into plain
/// segments first.
fn windows_intersect(a_start: NaiveTime, a_end: NaiveTime, b_start: NaiveTime, b_end: NaiveTime) -> bool {
    let a_segments = unroll(a_start, a_end);
    let b_segments = unroll(b_start, b_end);
    a_segments.iter().any(|x| {
        b_segments
            .iter()
            .any(|y| x.0.max(y.0) <= x.1.min(y.1))
    })
}

/// A window as one or two non-wrapping `(start, end)` segments in seconds
/// from midnight.
fn unroll(start: NaiveTime, end: NaiveTime) -> Vec<(u32, u32)> {
    use chrono::Timelike;
    let s = start.num_seconds_from_midnight();
    let e = end.num_seconds_from_midnight();
    if s <= e {
        vec![(s, e)]
    } else {
        vec![(s, 86_399), (0, e)]
    }
}

/// State predicates are compatible unless they disagree on a shared key:
/// contradictory boolean-like values, or unequal scalar values.
fn state_predicates_compatible(a: &StateMap, b: &StateMap) -> bool {
    for (key, a_value) in a {
        let Some(b_value) = b.get(key) else {
            continue;
        };
        if BOOLEAN_LIKE_KEYS.contains(&key.as_str()) {
            if json_truthy(a_value) != json_truthy(b_value) {
                return false;
            }
        } else if a_value != b_value {
            return false;
        }
    }
    true
}

/// The conflict matrix over canonical action signatures. `None` means the
/// two actions can coexist.
fn signature_conflict(
    a: &ActionSignature,
    b: &ActionSignature,
) -> Option<(&'static str, String)> {
    if a.toggle && b.toggle {
        return Some((
            "action_type",
            "both rules toggle the same device".to_string(),
        ));
    }
    if a.toggle != b.toggle {
        return Some((
            "action_type",
            "one rule toggles while the other sets a fixed state".to_string(),
        ));
    }
    if let (Some(x), Some(y)) = (a.desired_on, b.desired_on) {
        if x != y {
            return Some((
                "action_type",
                "one rule turns the device on while the other turns it off".to_string(),
            ));
        }
    }
    if let (Some(x), Some(y)) = (a.temp, b.temp) {
        if x != y {
            return Some(("action_value", "the rules set different temperatures".to_string()));
        }
    }
    if let (Some(x), Some(y)) = (a.speed, b.speed) {
        if x != y {
            return Some(("action_value", "the rules set different fan speeds".to_string()));
        }
    }
    if a == b {
        return Some(("action_type", "duplicate rule: identical action".to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionKind;
    use chrono::Utc;
    use serde_json::json;

    fn rule(
        id: u64,
        name: &str,
        trigger: TriggerKind,
        field: &str,
        action: ActionKind,
    ) -> SceneRule {
        let now = Utc::now();
        SceneRule {
            id,
            name: name.to_string(),
            enabled: true,
            owner: 1,
            trigger_device: 10,
            trigger_field: field.to_string(),
            trigger,
            action_device: 20,
            action,
            debounce_seconds: 60,
            created_at: now,
            updated_at: now,
            last_triggered_at: None,
        }
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_opposing_actions_on_overlapping_thresholds_conflict() {
        let r1 = rule(
            1,
            "hot on",
            TriggerKind::ThresholdAbove { threshold: 30.0 },
            "temp",
            ActionKind::TurnOn,
        );
        let r2 = rule(
            2,
            "hot off",
            TriggerKind::ThresholdAbove { threshold: 32.0 },
            "temp",
            ActionKind::TurnOff,
        );

        let conflicts = find_conflicts(&r2, &[r1]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].rule_id, 1);
        assert_eq!(conflicts[0].rule_name, "hot on");
        assert_eq!(conflicts[0].conflict_field, "action_type");
    }

    #[test]
    fn test_identical_actions_on_overlapping_triggers_are_duplicates() {
        let r1 = rule(
            1,
            "below 24 on",
            TriggerKind::ThresholdBelow { threshold: 24.0 },
            "temp",
            ActionKind::TurnOn,
        );
        let r2 = rule(
            2,
            "below 28 on",
            TriggerKind::ThresholdBelow { threshold: 28.0 },
            "temp",
            ActionKind::TurnOn,
        );

        let conflicts = find_conflicts(&r2, &[r1]);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].message.contains("duplicate rule"));
    }

    #[test]
    fn test_disjoint_intervals_do_not_conflict() {
        let r1 = rule(
            1,
            "cold on",
            TriggerKind::ThresholdBelow { threshold: 18.0 },
            "temp",
            ActionKind::TurnOn,
        );
        let r2 = rule(
            2,
            "hot off",
            TriggerKind::ThresholdAbove { threshold: 28.0 },
            "temp",
            ActionKind::TurnOff,
        );
        assert!(find_conflicts(&r2, &[r1]).is_empty());
    }

    #[test]
    fn test_different_fields_do_not_conflict() {
        let r1 = rule(
            1,
            "temp",
            TriggerKind::ThresholdAbove { threshold: 30.0 },
            "temp",
            ActionKind::TurnOn,
        );
        let r2 = rule(
            2,
            "humi",
            TriggerKind::ThresholdAbove { threshold: 30.0 },
            "humi",
            ActionKind::TurnOff,
        );
        assert!(find_conflicts(&r2, &[r1]).is_empty());
    }

    #[test]
    fn test_rule_never_conflicts_with_itself() {
        let r1 = rule(
            1,
            "self",
            TriggerKind::ThresholdAbove { threshold: 30.0 },
            "temp",
            ActionKind::TurnOn,
        );
        let mut renamed = r1.clone();
        renamed.name = "self renamed".to_string();
        assert!(find_conflicts(&renamed, &[r1]).is_empty());
    }

    #[test]
    fn test_range_out_overlaps_threshold_tail() {
        let r1 = rule(
            1,
            "out of band",
            TriggerKind::RangeOut { min: 18.0, max: 28.0 },
            "temp",
            ActionKind::TurnOn,
        );
        let r2 = rule(
            2,
            "very hot",
            TriggerKind::ThresholdAbove { threshold: 30.0 },
            "temp",
            ActionKind::TurnOff,
        );
        // (28, inf) intersects (30, inf).
        assert_eq!(find_conflicts(&r2, &[r1]).len(), 1);
    }

    #[test]
    fn test_different_temps_conflict_on_action_value() {
        let r1 = rule(
            1,
            "cool to 22",
            TriggerKind::ThresholdAbove { threshold: 28.0 },
            "temp",
            ActionKind::SetTemp(22.0),
        );
        let r2 = rule(
            2,
            "cool to 26",
            TriggerKind::ThresholdAbove { threshold: 29.0 },
            "temp",
            ActionKind::SetTemp(26.0),
        );
        let conflicts = find_conflicts(&r2, &[r1]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_field, "action_value");
    }

    #[test]
    fn test_time_state_windows() {
        let night = TriggerKind::TimeState {
            start: t(22, 0),
            end: t(6, 0),
            state_device: None,
            state_value: StateMap::new(),
        };
        let morning = TriggerKind::TimeState {
            start: t(5, 0),
            end: t(8, 0),
            state_device: None,
            state_value: StateMap::new(),
        };
        let afternoon = TriggerKind::TimeState {
            start: t(13, 0),
            end: t(17, 0),
            state_device: None,
            state_value: StateMap::new(),
        };

        let r1 = rule(1, "night", night.clone(), "", ActionKind::TurnOn);
        let r2 = rule(2, "morning", morning, "", ActionKind::TurnOff);
        let r3 = rule(3, "afternoon", afternoon, "", ActionKind::TurnOff);

        // Wrapping night window reaches into the morning window.
        assert_eq!(find_conflicts(&r2, &[r1.clone()]).len(), 1);
        // The afternoon window is disjoint from the night window.
        assert!(find_conflicts(&r3, &[r1]).is_empty());
    }

    #[test]
    fn test_time_state_contradictory_bool_keys_are_compatible_free() {
        let mut on_true = StateMap::new();
        on_true.insert("on".to_string(), json!(true));
        let mut on_false = StateMap::new();
        on_false.insert("on".to_string(), json!(false));

        let a = TriggerKind::TimeState {
            start: t(8, 0),
            end: t(18, 0),
            state_device: Some(5),
            state_value: on_true,
        };
        let b = TriggerKind::TimeState {
            start: t(9, 0),
            end: t(10, 0),
            state_device: Some(5),
            state_value: on_false,
        };

        let r1 = rule(1, "a", a, "", ActionKind::TurnOn);
        let r2 = rule(2, "b", b, "", ActionKind::TurnOff);
        // Same window overlap but contradictory predicates: never both fire.
        assert!(find_conflicts(&r2, &[r1]).is_empty());
    }

    #[test]
    fn test_time_state_never_overlaps_numeric() {
        let a = TriggerKind::TimeState {
            start: t(0, 0),
            end: t(23, 59),
            state_device: None,
            state_value: StateMap::new(),
        };
        let r1 = rule(1, "all day", a, "", ActionKind::TurnOn);
        let r2 = rule(
            2,
            "hot",
            TriggerKind::ThresholdAbove { threshold: 0.0 },
            "temp",
            ActionKind::TurnOff,
        );
        assert!(find_conflicts(&r2, &[r1]).is_empty());
    }
}
