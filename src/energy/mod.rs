//! Energy accounting: stepwise power curves, kWh integration, aggregation,
//! and monthly projection.
//!
//! Power for any device state is either measured (`power_w`/`power` fields)
//! or estimated from the per-type profile; the integrator reconstructs a
//! piecewise-constant curve from history points and integrates it over the
//! requested window.

mod analysis;
mod power;

pub use analysis::{
    build_energy_analysis, device_energy_in_range, monthly_estimate, range_window,
    AggregateSummary, DeviceBreakdownEntry, DeviceEnergy, EnergyAnalysis, MonthlyEstimate,
    SeriesPoint,
};
pub use power::{estimate_power, measured_power, power_for_state};
