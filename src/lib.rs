//! hearthd: smart-home telemetry and control core
//!
//! Server-side core of a smart-home platform.
//!
//! ## Architecture
//!
//! - **Telemetry Gateway**: MQTT ingestion, last-will semantics, history
//! - **Scene Rule Engine**: reactive automation with debounce and conflict
//!   validation
//! - **Energy Engine**: stepwise power curves, kWh accounting, projections
//! - **Realtime Fan-out**: per-subscriber SSE streams gated by one-shot
//!   tickets
//! - **Email Alert Engine**: threshold-driven alert mail

pub mod alerts;
pub mod api;
pub mod bus;
pub mod config;
pub mod energy;
pub mod gateway;
pub mod realtime;
pub mod scenes;
pub mod store;
pub mod types;

// Re-export configuration
pub use config::HomeConfig;

// Re-export commonly used types
pub use types::{
    ActionKind, Device, DeviceData, DeviceType, EmailAlertRule, LogLevel, LogSource, SceneRule,
    SceneRuleDraft, StateMap, SystemLog, TriggerKind,
};

// Re-export storage
pub use store::{Store, StoreError};

// Re-export the bus seam
pub use bus::{BusMessage, CommandPublisher, MqttBus};
