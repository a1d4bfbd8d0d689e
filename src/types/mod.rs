//! Core domain types shared across the gateway, engines, and API.
//!
//! Everything that crosses a module boundary lives here: devices and their
//! state maps, history points, persisted system logs, scene rules, and email
//! alert rules. All types serialize with the wire names the device fleet and
//! UI already speak (`TEMP_HUMI`, `THRESHOLD_ABOVE`, ...).

pub mod alert;
pub mod device;
pub mod log;
pub mod rule;

pub use alert::{AlertPreset, EmailAlertRule};
pub use device::{Device, DeviceData, DeviceType, StateMap};
pub use log::{LogLevel, LogSource, SystemLog};
pub use rule::{
    ActionKind, ActionSignature, RuleValidationError, SceneRule, SceneRuleDraft, TriggerKind,
    TriggerValue,
};
