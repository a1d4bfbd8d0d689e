//! Runtime Configuration
//!
//! Provides process-wide configuration loaded from a TOML file with
//! environment variable overrides for the deployment-sensitive values.
//!
//! ## Loading Order
//!
//! 1. `HEARTHD_CONFIG` environment variable (path to TOML file)
//! 2. `hearthd.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(HomeConfig::load());
//!
//! // Anywhere in the codebase:
//! let price = config::get().energy.price_per_kwh;
//! ```

mod settings;

pub use settings::*;

use std::sync::OnceLock;

/// Global configuration, initialized once at startup.
static HOME_CONFIG: OnceLock<HomeConfig> = OnceLock::new();

/// Initialize the global configuration.
///
/// Should be called exactly once before any calls to `get()`; repeated calls
/// are ignored with a warning.
pub fn init(config: HomeConfig) {
    if HOME_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global configuration.
///
/// Panics if `init()` has not been called. A missing config is a fatal
/// startup error, not a recoverable condition.
pub fn get() -> &'static HomeConfig {
    HOME_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    HOME_CONFIG.get().is_some()
}
