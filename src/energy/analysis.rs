//! The stepwise integrator, device-set aggregation, and monthly projection.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;

use super::power::{measured_power, power_for_state};
use crate::config::EnergyConfig;
use crate::store::{Store, StoreError};
use crate::types::device::json_truthy;
use crate::types::{Device, StateMap};

/// One breakpoint of a stepwise power curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub power_w: f64,
}

/// Per-device integration result over a window.
#[derive(Debug, Clone)]
pub struct DeviceEnergy {
    pub device: Device,
    pub series: Vec<SeriesPoint>,
    pub energy_kwh: f64,
    pub peak_power_w: f64,
    pub avg_power_w: f64,
    pub cost: f64,
    pub runtime_hours: f64,
    pub runtime_trackable: bool,
}

/// Aggregate over a device set.
#[derive(Debug, Clone)]
pub struct AggregateSummary {
    pub series: Vec<SeriesPoint>,
    pub energy_kwh: f64,
    pub peak_power_w: f64,
    pub avg_power_w: f64,
    pub cost: f64,
}

/// Month-to-date accounting and the end-of-month projection.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyEstimate {
    pub month: String,
    pub energy_kwh_so_far: f64,
    pub cost_so_far: f64,
    pub projected_energy_kwh: f64,
    pub projected_cost: f64,
    pub elapsed_days: f64,
    pub days_in_month: u32,
    /// Keyed by device id; only runtime-trackable types appear.
    pub runtime_hours_by_device: std::collections::BTreeMap<u64, f64>,
}

/// Serialized per-device row of the analysis response, sorted by energy.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceBreakdownEntry {
    pub device_id: u64,
    pub name: String,
    pub location: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub type_display: String,
    pub energy_kwh: f64,
    pub cost: f64,
    pub peak_power_w: f64,
    pub avg_power_w: f64,
    pub monthly_runtime_hours: Option<f64>,
}

/// The full energy analysis response.
#[derive(Debug, Clone, Serialize)]
pub struct EnergyAnalysis {
    pub range: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub price_per_kwh: f64,
    pub total: TotalSummary,
    pub series: Vec<WireSeriesPoint>,
    pub device_breakdown: Vec<DeviceBreakdownEntry>,
    pub monthly_estimate: MonthlyEstimate,
}

#[derive(Debug, Clone, Serialize)]
pub struct TotalSummary {
    pub energy_kwh: f64,
    pub cost: f64,
    pub peak_power_w: f64,
    pub avg_power_w: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireSeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub power_w: f64,
}

/// Resolve a range bucket name to its window, defaulting to 24h.
pub fn range_window(range: &str, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let delta = match range {
        "6h" => Duration::hours(6),
        "3d" => Duration::days(3),
        "7d" => Duration::days(7),
        "30d" => Duration::days(30),
        _ => Duration::hours(24),
    };
    (now - delta, now)
}

/// Merge a history row into the running state, stripping stale power
/// readings when the row reports `on=false` without its own power field.
fn merge_row(state: &mut StateMap, row: &StateMap) {
    for (key, value) in row {
        state.insert(key.clone(), value.clone());
    }
    let row_reports_off = row
        .get("on")
        .map(|v| !json_truthy(v))
        .unwrap_or(false);
    if row_reports_off && !row.contains_key("power_w") && !row.contains_key("power") {
        state.remove("power_w");
        state.remove("power");
    }
}

/// Whether the device counts as running for runtime accounting.
fn is_running(state: &StateMap, power_w: f64) -> bool {
    match state.get("on") {
        Some(v) => json_truthy(v),
        None => power_w > 0.0,
    }
}

/// Integrate one device's power curve over `[start, end]`.
pub fn device_energy_in_range(
    store: &Store,
    device: &Device,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    config: &EnergyConfig,
) -> Result<DeviceEnergy, StoreError> {
    let profile = &config.power_profile;

    // Baseline: the last point before the window, with any measured power
    // dropped if that point left the device off.
    let (mut current_state, mut current_power) =
        match store.latest_point_before(device.id, start)? {
            Some(baseline) => {
                let mut state = baseline.data;
                let off = state.get("on").map(|v| !json_truthy(v)).unwrap_or(false);
                if off && measured_power(&state).is_some() {
                    state.remove("power_w");
                    state.remove("power");
                }
                let power = power_for_state(device.device_type, &state, profile);
                (state, power)
            }
            None => (StateMap::new(), 0.0),
        };

    let points = store.points_in_range(device.id, start, end)?;

    let mut series = vec![SeriesPoint {
        timestamp: start,
        power_w: current_power,
    }];
    let mut energy_kwh = 0.0;
    let mut runtime_hours = 0.0;
    let runtime_trackable = device.device_type.is_runtime_trackable();
    let mut cursor = start;

    for point in points {
        if point.timestamp <= cursor {
            // Late or duplicate timestamp: fold into the cursor state
            // without emitting a sample.
            merge_row(&mut current_state, &point.data);
            current_power = power_for_state(device.device_type, &current_state, profile);
            continue;
        }

        let duration_hours = (point.timestamp - cursor).num_milliseconds() as f64 / 3_600_000.0;
        energy_kwh += current_power * duration_hours / 1000.0;
        if runtime_trackable && is_running(&current_state, current_power) {
            runtime_hours += duration_hours;
        }

        let mut new_state = current_state.clone();
        merge_row(&mut new_state, &point.data);
        let new_power = power_for_state(device.device_type, &new_state, profile);
        if new_power != current_power {
            series.push(SeriesPoint {
                timestamp: point.timestamp,
                power_w: new_power,
            });
        }
        current_state = new_state;
        current_power = new_power;
        cursor = point.timestamp;
    }

    if end > cursor {
        let duration_hours = (end - cursor).num_milliseconds() as f64 / 3_600_000.0;
        energy_kwh += current_power * duration_hours / 1000.0;
        if runtime_trackable && is_running(&current_state, current_power) {
            runtime_hours += duration_hours;
        }
    }

    if series
        .last()
        .map(|p| p.timestamp != end)
        .unwrap_or(true)
    {
        series.push(SeriesPoint {
            timestamp: end,
            power_w: current_power,
        });
    }

    let peak_power_w = series.iter().map(|p| p.power_w).fold(0.0, f64::max);
    let total_hours = ((end - start).num_milliseconds() as f64 / 3_600_000.0).max(1e-6);
    let avg_power_w = energy_kwh * 1000.0 / total_hours;

    Ok(DeviceEnergy {
        device: device.clone(),
        series,
        energy_kwh,
        peak_power_w,
        avg_power_w,
        cost: energy_kwh * config.price_per_kwh,
        runtime_hours,
        runtime_trackable,
    })
}

/// Pointwise sum of per-device curves, built from a power-delta event map.
fn aggregate_devices(
    device_results: &[DeviceEnergy],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    price_per_kwh: f64,
) -> AggregateSummary {
    if device_results.is_empty() {
        return AggregateSummary {
            series: vec![
                SeriesPoint { timestamp: start, power_w: 0.0 },
                SeriesPoint { timestamp: end, power_w: 0.0 },
            ],
            energy_kwh: 0.0,
            peak_power_w: 0.0,
            avg_power_w: 0.0,
            cost: 0.0,
        };
    }

    let initial_total: f64 = device_results
        .iter()
        .map(|r| r.series.first().map(|p| p.power_w).unwrap_or(0.0))
        .sum();

    let mut events: std::collections::BTreeMap<DateTime<Utc>, f64> =
        std::collections::BTreeMap::new();
    for result in device_results {
        for window in result.series.windows(2) {
            let (prev, next) = (window[0], window[1]);
            if next.timestamp < start || next.timestamp > end {
                continue;
            }
            let delta = next.power_w - prev.power_w;
            if delta == 0.0 {
                continue;
            }
            *events.entry(next.timestamp).or_insert(0.0) += delta;
        }
    }

    let mut series = vec![SeriesPoint {
        timestamp: start,
        power_w: initial_total,
    }];
    let mut current_total = initial_total;
    for (timestamp, delta) in events {
        if timestamp <= start || timestamp > end {
            continue;
        }
        current_total += delta;
        series.push(SeriesPoint {
            timestamp,
            power_w: current_total,
        });
    }
    if series
        .last()
        .map(|p| p.timestamp != end)
        .unwrap_or(true)
    {
        series.push(SeriesPoint {
            timestamp: end,
            power_w: current_total,
        });
    }

    let energy_kwh: f64 = device_results.iter().map(|r| r.energy_kwh).sum();
    let peak_power_w = series.iter().map(|p| p.power_w).fold(0.0, f64::max);
    let total_hours = ((end - start).num_milliseconds() as f64 / 3_600_000.0).max(1e-6);

    AggregateSummary {
        series,
        energy_kwh,
        peak_power_w,
        avg_power_w: energy_kwh * 1000.0 / total_hours,
        cost: energy_kwh * price_per_kwh,
    }
}

/// Month-to-date integration plus a straight-line projection to month end.
pub fn monthly_estimate(
    store: &Store,
    devices: &[Device],
    now: DateTime<Utc>,
    config: &EnergyConfig,
) -> Result<MonthlyEstimate, StoreError> {
    let month_start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    let days_in_month = days_in_month(now.year(), now.month());
    let month_end = month_start + Duration::days(i64::from(days_in_month));

    let mut device_results = Vec::with_capacity(devices.len());
    for device in devices {
        device_results.push(device_energy_in_range(
            store,
            device,
            month_start,
            now,
            config,
        )?);
    }
    let summary = aggregate_devices(&device_results, month_start, now, config.price_per_kwh);

    let mut runtime_hours_by_device = std::collections::BTreeMap::new();
    for result in &device_results {
        if result.runtime_trackable {
            runtime_hours_by_device.insert(result.device.id, round2(result.runtime_hours));
        }
    }

    let elapsed_seconds = ((now - month_start).num_milliseconds() as f64 / 1000.0).max(1.0);
    let month_seconds = ((month_end - month_start).num_milliseconds() as f64 / 1000.0).max(1.0);
    let projected_energy = summary.energy_kwh / elapsed_seconds * month_seconds;

    Ok(MonthlyEstimate {
        month: format!("{:04}-{:02}", now.year(), now.month()),
        energy_kwh_so_far: round3(summary.energy_kwh),
        cost_so_far: round2(summary.cost),
        projected_energy_kwh: round3(projected_energy),
        projected_cost: round2(projected_energy * config.price_per_kwh),
        elapsed_days: round2(elapsed_seconds / 86_400.0),
        days_in_month,
        runtime_hours_by_device,
    })
}

/// Build the full analysis response for a device set and range bucket.
pub fn build_energy_analysis(
    store: &Store,
    devices: &[Device],
    range: &str,
    now: DateTime<Utc>,
    config: &EnergyConfig,
) -> Result<EnergyAnalysis, StoreError> {
    let (start, end) = range_window(range, now);

    let mut device_results = Vec::with_capacity(devices.len());
    for device in devices {
        device_results.push(device_energy_in_range(store, device, start, end, config)?);
    }
    let total = aggregate_devices(&device_results, start, end, config.price_per_kwh);
    let monthly = monthly_estimate(store, devices, now, config)?;

    let mut device_breakdown: Vec<DeviceBreakdownEntry> = device_results
        .iter()
        .map(|result| DeviceBreakdownEntry {
            device_id: result.device.id,
            name: result.device.name.clone(),
            location: result.device.location.clone(),
            device_type: result.device.device_type.as_str().to_string(),
            type_display: result.device.device_type.label().to_string(),
            energy_kwh: round3(result.energy_kwh),
            cost: round2(result.cost),
            peak_power_w: round1(result.peak_power_w),
            avg_power_w: round1(result.avg_power_w),
            monthly_runtime_hours: monthly.runtime_hours_by_device.get(&result.device.id).copied(),
        })
        .collect();
    device_breakdown.sort_by(|a, b| {
        b.energy_kwh
            .partial_cmp(&a.energy_kwh)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let series = total
        .series
        .iter()
        .map(|p| WireSeriesPoint {
            timestamp: p.timestamp,
            power_w: round1(p.power_w),
        })
        .collect();

    Ok(EnergyAnalysis {
        range: range.to_string(),
        start,
        end,
        price_per_kwh: config.price_per_kwh,
        total: TotalSummary {
            energy_kwh: round3(total.energy_kwh),
            cost: round2(total.cost),
            peak_power_w: round1(total.peak_power_w),
            avg_power_w: round1(total.avg_power_w),
        },
        series,
        device_breakdown,
        monthly_estimate: monthly,
    })
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    let first = chrono::NaiveDate::from_ymd_opt(year, month, 1);
    let next = chrono::NaiveDate::from_ymd_opt(next_year, next_month, 1);
    match (first, next) {
        (Some(a), Some(b)) => (b - a).num_days() as u32,
        _ => 30,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
