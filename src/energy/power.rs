//! Per-state power derivation: measured first, profile estimate second.

use serde_json::Value;

use crate::config::PowerProfile;
use crate::types::device::json_truthy;
use crate::types::{DeviceType, StateMap};

/// Measured power in watts, if the state carries one. Negative readings
/// clamp to zero.
pub fn measured_power(state: &StateMap) -> Option<f64> {
    let value = state.get("power_w").or_else(|| state.get("power"))?;
    value.as_f64().map(|w| w.max(0.0))
}

/// Estimated power for a device type without a measured reading.
pub fn estimate_power(device_type: DeviceType, state: &StateMap, profile: &PowerProfile) -> f64 {
    let on = state.get("on").map(json_truthy).unwrap_or(false);

    match device_type {
        DeviceType::LampSwitch => {
            if on {
                profile.lamp_on_w
            } else {
                0.0
            }
        }
        DeviceType::FanSwitch => {
            if !on {
                return 0.0;
            }
            let speed = state
                .get("speed")
                .and_then(Value::as_f64)
                .unwrap_or(1.0) as i64;
            match speed {
                i64::MIN..=1 => profile.fan_speed_1_w,
                2 => profile.fan_speed_2_w,
                _ => profile.fan_speed_3_w,
            }
        }
        DeviceType::AcSwitch => {
            if !on {
                return 0.0;
            }
            let temp = state.get("temp").and_then(Value::as_f64).unwrap_or(26.0);
            let estimated = profile.ac_base_w + (26.0 - temp) * profile.ac_temp_step_w;
            estimated.clamp(profile.ac_min_w, profile.ac_max_w)
        }
        ty if ty.is_sensor() => {
            // Sensors idle at a fixed draw once they have reported anything.
            if state.is_empty() {
                0.0
            } else {
                profile.sensor_idle_w
            }
        }
        _ => 0.0,
    }
}

/// The power the integrator assigns to a state: measured wins, the profile
/// estimate covers the rest.
pub fn power_for_state(device_type: DeviceType, state: &StateMap, profile: &PowerProfile) -> f64 {
    measured_power(state).unwrap_or_else(|| estimate_power(device_type, state, profile))
}
