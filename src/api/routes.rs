//! API route definitions
//!
//! Organizes endpoints for the smart-home operator UI:
//! - /api/devices - device listing, control, history
//! - /api/energy - energy analysis reports
//! - /api/scenes - scene rule management (with conflict validation)
//! - /api/alerts - email alert rule management
//! - /api/realtime - one-shot stream tickets and the SSE stream
//! - /api/logs, /api/mqtt - system logs and bus status

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use super::handlers::{self, AppContext};

/// Create all API routes.
pub fn api_routes(ctx: AppContext) -> Router {
    Router::new()
        // Devices
        .route("/devices", get(handlers::list_devices))
        .route("/devices", post(handlers::create_device))
        .route("/devices/types", get(handlers::list_device_types))
        .route("/devices/:id", put(handlers::update_device))
        .route("/devices/:id", delete(handlers::delete_device))
        .route("/devices/:id/history", get(handlers::device_history))
        .route("/devices/:id/toggle", post(handlers::toggle_device))
        .route("/devices/:id/set_temp", post(handlers::set_temp))
        .route("/devices/:id/set_fan_speed", post(handlers::set_fan_speed))
        // Energy
        .route("/energy/analysis", get(handlers::energy_analysis))
        // Logs & bus status
        .route("/logs", get(handlers::list_logs))
        .route("/mqtt/status", get(handlers::mqtt_status))
        // Scene rules
        .route("/scenes", get(handlers::list_scene_rules))
        .route("/scenes", post(handlers::create_scene_rule))
        .route("/scenes/:id", put(handlers::update_scene_rule))
        .route("/scenes/:id", delete(handlers::delete_scene_rule))
        // Email alert rules
        .route("/alerts", get(handlers::list_email_rules))
        .route("/alerts", post(handlers::create_email_rule))
        .route("/alerts/:id", put(handlers::update_email_rule))
        .route("/alerts/:id", delete(handlers::delete_email_rule))
        // Realtime stream
        .route("/realtime/stream-token", get(handlers::stream_token))
        .route("/realtime/stream", get(handlers::stream))
        .with_state(ctx)
}

/// Liveness endpoint at root level.
pub fn health_routes() -> Router {
    Router::new().route("/health", get(handlers::get_health))
}
