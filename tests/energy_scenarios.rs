//! Energy engine end-to-end scenarios with fixed clocks.
//!
//! Each scenario seeds history rows at known timestamps and checks the
//! integrated energy, the emitted series breakpoints, and the monthly
//! projection against hand-computed values.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use common::{add_device, state, temp_store};
use hearthd::config::EnergyConfig;
use hearthd::energy::{build_energy_analysis, device_energy_in_range, monthly_estimate};
use hearthd::types::DeviceType;
use serde_json::json;

fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn config() -> EnergyConfig {
    EnergyConfig::default()
}

/// AC with no pre-month baseline: one 900 W hour inside the month.
#[test]
fn test_ac_monthly_without_pre_month_point() {
    let (store, _dir) = temp_store();
    let ac = add_device(
        &store,
        "living room ac",
        DeviceType::AcSwitch,
        state(json!({"on": true, "temp": 26, "power_w": 900})),
    );

    store
        .append_point(
            ac.id,
            at(2026, 2, 10, 10, 0),
            &state(json!({"on": true, "temp": 26, "power_w": 900})),
        )
        .unwrap();
    store
        .append_point(
            ac.id,
            at(2026, 2, 10, 11, 0),
            &state(json!({"on": false, "temp": 26, "power_w": 0})),
        )
        .unwrap();

    let now = at(2026, 2, 10, 12, 0);
    let monthly = monthly_estimate(&store, &[ac], now, &config()).unwrap();

    assert!((monthly.energy_kwh_so_far - 0.9).abs() < 1e-6);
    assert!((monthly.cost_so_far - 0.5).abs() < 1e-9); // round(0.9 * 0.56, 2)
    assert_eq!(monthly.month, "2026-02");
    assert_eq!(monthly.days_in_month, 28);
}

/// An off event without a power field must not carry the old measured power
/// forward into the off interval.
#[test]
fn test_off_event_without_power_field_drops_power() {
    let (store, _dir) = temp_store();
    let ac = add_device(&store, "bedroom ac", DeviceType::AcSwitch, state(json!({})));

    store
        .append_point(
            ac.id,
            at(2026, 2, 10, 8, 0),
            &state(json!({"on": true, "temp": 26, "power_w": 900})),
        )
        .unwrap();
    store
        .append_point(ac.id, at(2026, 2, 10, 9, 0), &state(json!({"on": false})))
        .unwrap();
    store
        .append_point(
            ac.id,
            at(2026, 2, 10, 11, 0),
            &state(json!({"on": true, "temp": 26})),
        )
        .unwrap();

    let start = at(2026, 2, 10, 8, 30);
    let end = at(2026, 2, 10, 11, 30);
    let result = device_energy_in_range(&store, &ac, start, end, &config()).unwrap();

    // 0.5h at 900 W (baseline) + 2h at 0 W + 0.5h at 900 W (estimated).
    assert!((result.energy_kwh - 0.9).abs() < 1e-6);

    let off_sample = result
        .series
        .iter()
        .find(|p| p.timestamp == at(2026, 2, 10, 9, 0))
        .expect("series must contain the off transition");
    assert_eq!(off_sample.power_w, 0.0);

    let on_sample = result
        .series
        .iter()
        .find(|p| p.timestamp == at(2026, 2, 10, 11, 0))
        .expect("series must contain the on transition");
    assert!((on_sample.power_w - 900.0).abs() < 1e-6);
}

/// Fan runtime accounting: 1.5 hours on during the month.
#[test]
fn test_fan_runtime_hours() {
    let (store, _dir) = temp_store();
    let fan = add_device(&store, "desk fan", DeviceType::FanSwitch, state(json!({})));

    store
        .append_point(
            fan.id,
            at(2026, 2, 10, 0, 30),
            &state(json!({"on": true, "speed": 1, "power_w": 30})),
        )
        .unwrap();
    store
        .append_point(
            fan.id,
            at(2026, 2, 10, 2, 0),
            &state(json!({"on": false, "speed": 1, "power_w": 0})),
        )
        .unwrap();

    let now = at(2026, 2, 10, 12, 0);
    let monthly = monthly_estimate(&store, &[fan.clone()], now, &config()).unwrap();

    let runtime = monthly.runtime_hours_by_device.get(&fan.id).copied();
    assert_eq!(runtime, Some(1.5));
}

/// Sensors never appear in the runtime map.
#[test]
fn test_sensor_has_no_runtime_entry() {
    let (store, _dir) = temp_store();
    let sensor = add_device(
        &store,
        "hall sensor",
        DeviceType::TempHumi,
        state(json!({"temp": 22})),
    );
    store
        .append_point(sensor.id, at(2026, 2, 10, 1, 0), &state(json!({"temp": 22})))
        .unwrap();

    let monthly =
        monthly_estimate(&store, &[sensor.clone()], at(2026, 2, 10, 2, 0), &config()).unwrap();
    assert!(!monthly.runtime_hours_by_device.contains_key(&sensor.id));
}

/// The aggregate series covers exactly [start, end] and its integral equals
/// the reported energy.
#[test]
fn test_aggregate_series_bounds_and_integral() {
    let (store, _dir) = temp_store();
    let lamp = add_device(&store, "lamp", DeviceType::LampSwitch, state(json!({})));
    let fan = add_device(&store, "fan", DeviceType::FanSwitch, state(json!({})));

    store
        .append_point(lamp.id, at(2026, 2, 10, 9, 0), &state(json!({"on": true})))
        .unwrap();
    store
        .append_point(lamp.id, at(2026, 2, 10, 10, 0), &state(json!({"on": false})))
        .unwrap();
    store
        .append_point(
            fan.id,
            at(2026, 2, 10, 9, 30),
            &state(json!({"on": true, "speed": 2})),
        )
        .unwrap();

    let now = at(2026, 2, 10, 11, 0);
    let report = build_energy_analysis(
        &store,
        &[lamp, fan],
        "6h",
        now,
        &config(),
    )
    .unwrap();

    let series = &report.series;
    assert_eq!(series.first().unwrap().timestamp, now - chrono::Duration::hours(6));
    assert_eq!(series.last().unwrap().timestamp, now);

    // Stepwise integral of the emitted aggregate curve.
    let mut integral_kwh = 0.0;
    for window in series.windows(2) {
        let hours =
            (window[1].timestamp - window[0].timestamp).num_milliseconds() as f64 / 3_600_000.0;
        integral_kwh += window[0].power_w * hours / 1000.0;
    }
    assert!(
        (integral_kwh - report.total.energy_kwh).abs() < 0.005,
        "series integral {integral_kwh} != reported {}",
        report.total.energy_kwh
    );

    // 9.0 W lamp for 1h + 45 W fan for 1.5h.
    let expected = (9.0 * 1.0 + 45.0 * 1.5) / 1000.0;
    assert!((report.total.energy_kwh - expected).abs() < 0.005);
}

/// Late/duplicate timestamps merge into the cursor without emitting samples.
#[test]
fn test_out_of_order_point_updates_cursor_state_only() {
    let (store, _dir) = temp_store();
    let lamp = add_device(&store, "lamp", DeviceType::LampSwitch, state(json!({})));

    store
        .append_point(lamp.id, at(2026, 2, 10, 9, 0), &state(json!({"on": true})))
        .unwrap();
    // Same timestamp again (broker redelivery): folds into cursor state.
    store
        .append_point(lamp.id, at(2026, 2, 10, 9, 0), &state(json!({"on": true})))
        .unwrap();

    let start = at(2026, 2, 10, 8, 0);
    let end = at(2026, 2, 10, 10, 0);
    let result = device_energy_in_range(&store, &lamp, start, end, &config()).unwrap();

    // Sentinel at start, one transition, sentinel at end.
    assert_eq!(result.series.len(), 3);
    assert!((result.energy_kwh - 0.009).abs() < 1e-6);
}

/// The device breakdown is sorted by energy, highest first.
#[test]
fn test_breakdown_sorted_by_energy() {
    let (store, _dir) = temp_store();
    let lamp = add_device(&store, "lamp", DeviceType::LampSwitch, state(json!({})));
    let ac = add_device(&store, "ac", DeviceType::AcSwitch, state(json!({})));

    store
        .append_point(lamp.id, at(2026, 2, 10, 9, 0), &state(json!({"on": true})))
        .unwrap();
    store
        .append_point(
            ac.id,
            at(2026, 2, 10, 9, 0),
            &state(json!({"on": true, "temp": 24})),
        )
        .unwrap();

    let report = build_energy_analysis(
        &store,
        &[lamp, ac.clone()],
        "6h",
        at(2026, 2, 10, 12, 0),
        &config(),
    )
    .unwrap();

    assert_eq!(report.device_breakdown[0].device_id, ac.id);
    assert!(report.device_breakdown[0].energy_kwh >= report.device_breakdown[1].energy_kwh);
}
