//! Email alert rule model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Preset alert categories. The label feeds the `{preset}` template
/// placeholder and the default subject line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertPreset {
    #[serde(rename = "HIGH_TEMP")]
    HighTemp,
    #[serde(rename = "LOW_TEMP")]
    LowTemp,
    #[serde(rename = "HIGH_HUMI")]
    HighHumi,
    #[serde(rename = "SMOKE")]
    Smoke,
    #[serde(rename = "CUSTOM")]
    Custom,
}

impl AlertPreset {
    pub fn label(self) -> &'static str {
        match self {
            AlertPreset::HighTemp => "High temperature",
            AlertPreset::LowTemp => "Low temperature",
            AlertPreset::HighHumi => "High humidity",
            AlertPreset::Smoke => "Smoke detected",
            AlertPreset::Custom => "Custom alert",
        }
    }
}

/// A threshold-driven email alert rule.
///
/// Numeric fields fire inclusively (`>=` / `<=`), unlike scene rules which
/// are strict; the asymmetry is long-standing product behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAlertRule {
    pub id: u64,
    pub name: String,
    pub enabled: bool,
    pub preset: AlertPreset,
    pub trigger_device: u64,
    pub trigger_field: String,
    /// Absent means "fire on any report" for smoke rules (treated as 1.0);
    /// a non-smoke rule without a threshold never fires.
    #[serde(default)]
    pub trigger_value: Option<f64>,
    /// Fire when the value is at or above the threshold; otherwise at or below.
    pub trigger_above: bool,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject_template: String,
    pub body_template: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
}
