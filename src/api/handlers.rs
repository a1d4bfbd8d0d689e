//! API route handlers.
//!
//! Request handling for the operator UI: device listing and control, raw
//! history, energy analysis, system logs, scene rule and email alert rule
//! management, and the realtime stream endpoints.
//!
//! Authentication happens upstream; handlers trust the `uid`/`admin` query
//! parameters the proxy injects and only enforce visibility/role rules.

use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{NaiveTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::bus::CommandPublisher;
use crate::energy;
use crate::realtime::{self, TicketIssuer};
use crate::scenes;
use crate::store::{NewDevice, Store, StoreError};
use crate::types::{
    AlertPreset, DeviceType, EmailAlertRule, SceneRule, SceneRuleDraft, StateMap, TriggerValue,
};

// ============================================================================
// Shared State
// ============================================================================

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppContext {
    pub store: Store,
    pub publisher: Arc<dyn CommandPublisher>,
    pub tickets: Arc<TicketIssuer>,
}

/// Caller identity as injected by the upstream proxy.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Caller {
    #[serde(default)]
    pub uid: Option<u64>,
    #[serde(default)]
    pub admin: Option<bool>,
}

impl Caller {
    /// An absent identity is the local admin (CLI, tests, trusted proxy).
    pub fn resolved(self) -> (Option<u64>, bool) {
        let admin = self.admin.unwrap_or(self.uid.is_none());
        (self.uid, admin)
    }
}

fn store_error(e: StoreError) -> Response {
    match e {
        StoreError::NotFound(kind, id) => {
            ApiErrorResponse::not_found(format!("{kind} {id} not found"))
        }
        other => {
            warn!(error = %other, "storage error");
            ApiErrorResponse::internal(other.to_string())
        }
    }
}

// ============================================================================
// Health
// ============================================================================

/// GET /health — liveness probe.
pub async fn get_health() -> Json<Value> {
    Json(json!({"status": "ok", "service": "hearthd"}))
}

// ============================================================================
// Devices
// ============================================================================

/// GET /api/devices — devices visible to the caller.
pub async fn list_devices(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
) -> Response {
    let (uid, admin) = caller.resolved();
    match ctx.store.visible_devices(uid, admin) {
        Ok(devices) => ApiResponse::ok(devices),
        Err(e) => store_error(e),
    }
}

/// GET /api/devices/types — `{value, label}` pairs for the type picker.
pub async fn list_device_types() -> Response {
    let types: Vec<Value> = DeviceType::ALL
        .iter()
        .map(|t| json!({"value": t.as_str(), "label": t.label()}))
        .collect();
    ApiResponse::ok(types)
}

#[derive(Debug, Deserialize)]
pub struct DeviceDraft {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub owner: Option<u64>,
}

/// POST /api/devices — register a device (admin only).
pub async fn create_device(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
    Json(draft): Json<DeviceDraft>,
) -> Response {
    let (_, admin) = caller.resolved();
    if !admin {
        return ApiErrorResponse::forbidden("device management requires admin");
    }
    let new = NewDevice {
        name: draft.name,
        device_type: draft.device_type,
        location: draft.location,
        is_public: draft.is_public,
        owner: draft.owner,
        initial_state: StateMap::new(),
    };
    match ctx.store.insert_device(new) {
        Ok(device) => ApiResponse::ok(device),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceUpdate {
    pub name: Option<String>,
    pub location: Option<String>,
    pub is_public: Option<bool>,
    pub owner: Option<Option<u64>>,
}

/// PUT /api/devices/{id} — partial update (admin only).
pub async fn update_device(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
    Path(id): Path<u64>,
    Json(update): Json<DeviceUpdate>,
) -> Response {
    let (_, admin) = caller.resolved();
    if !admin {
        return ApiErrorResponse::forbidden("device management requires admin");
    }
    let mut device = match ctx.store.get_device(id) {
        Ok(Some(d)) => d,
        Ok(None) => return ApiErrorResponse::not_found(format!("device {id} not found")),
        Err(e) => return store_error(e),
    };

    if let Some(name) = update.name {
        device.name = name;
    }
    if let Some(location) = update.location {
        device.location = location;
    }
    if let Some(is_public) = update.is_public {
        device.is_public = is_public;
    }
    if let Some(owner) = update.owner {
        device.owner = owner;
    }
    device.touch();

    match ctx.store.put_device(&device) {
        Ok(()) => ApiResponse::ok(device),
        Err(e) => store_error(e),
    }
}

/// DELETE /api/devices/{id} — delete with cascade (admin only).
pub async fn delete_device(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
    Path(id): Path<u64>,
) -> Response {
    let (_, admin) = caller.resolved();
    if !admin {
        return ApiErrorResponse::forbidden("device management requires admin");
    }
    match ctx.store.delete_device(id) {
        Ok(()) => ApiResponse::ok(json!({"deleted": id})),
        Err(e) => store_error(e),
    }
}

// ============================================================================
// Device history
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub uid: Option<u64>,
    #[serde(default)]
    pub admin: Option<bool>,
}

/// GET /api/devices/{id}/history?range=24h|3d|7d — ascending raw points.
pub async fn device_history(
    State(ctx): State<AppContext>,
    Path(id): Path<u64>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let caller = Caller {
        uid: query.uid,
        admin: query.admin,
    };
    let (uid, admin) = caller.resolved();

    let device = match ctx.store.get_device(id) {
        Ok(Some(d)) => d,
        Ok(None) => return ApiErrorResponse::not_found(format!("device {id} not found")),
        Err(e) => return store_error(e),
    };
    if !device.visible_to(uid, admin) {
        return ApiErrorResponse::forbidden("device not visible to caller");
    }

    let range = query.range.as_deref().unwrap_or("24h");
    let (start, end) = energy::range_window(range, Utc::now());
    let points = match ctx.store.points_in_range(id, start, end) {
        Ok(points) => points,
        Err(e) => return store_error(e),
    };

    ApiResponse::ok(json!({
        "device_id": id,
        "range": range,
        "points": points,
    }))
}

// ============================================================================
// Device control
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    #[serde(default)]
    pub state: Option<bool>,
}

/// POST /api/devices/{id}/toggle — flip (or set) the `on` state and publish
/// the command to the bus.
pub async fn toggle_device(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
    Path(id): Path<u64>,
    Json(request): Json<ToggleRequest>,
) -> Response {
    let desired = match request.state {
        Some(explicit) => explicit,
        None => {
            let device = match ctx.store.get_device(id) {
                Ok(Some(d)) => d,
                Ok(None) => return ApiErrorResponse::not_found(format!("device {id} not found")),
                Err(e) => return store_error(e),
            };
            !device.state_bool("on")
        }
    };
    let mut delta = StateMap::new();
    delta.insert("on".to_string(), json!(desired));
    apply_command(&ctx, caller, id, delta, None).await
}

#[derive(Debug, Deserialize)]
pub struct SetTempRequest {
    pub temp: f64,
}

/// POST /api/devices/{id}/set_temp — AC setpoint; implies `on=true`.
pub async fn set_temp(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
    Path(id): Path<u64>,
    Json(request): Json<SetTempRequest>,
) -> Response {
    let mut delta = StateMap::new();
    delta.insert("temp".to_string(), json!(request.temp));
    delta.insert("on".to_string(), json!(true));
    apply_command(&ctx, caller, id, delta, Some(DeviceType::AcSwitch)).await
}

#[derive(Debug, Deserialize)]
pub struct SetFanSpeedRequest {
    pub speed: i64,
}

/// POST /api/devices/{id}/set_fan_speed — fan level 1..3; implies `on=true`.
pub async fn set_fan_speed(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
    Path(id): Path<u64>,
    Json(request): Json<SetFanSpeedRequest>,
) -> Response {
    if !(1..=3).contains(&request.speed) {
        return ApiErrorResponse::bad_request("speed must be 1, 2 or 3");
    }
    let mut delta = StateMap::new();
    delta.insert("speed".to_string(), json!(request.speed));
    delta.insert("on".to_string(), json!(true));
    apply_command(&ctx, caller, id, delta, Some(DeviceType::FanSwitch)).await
}

/// Shared control path: visibility check, optional type check, state merge,
/// persist, then bus publish. The persisted state commits before the
/// publish, matching the scene engine's ordering.
async fn apply_command(
    ctx: &AppContext,
    caller: Caller,
    id: u64,
    delta: StateMap,
    required_type: Option<DeviceType>,
) -> Response {
    let (uid, admin) = caller.resolved();

    let mut device = match ctx.store.get_device(id) {
        Ok(Some(d)) => d,
        Ok(None) => return ApiErrorResponse::not_found(format!("device {id} not found")),
        Err(e) => return store_error(e),
    };
    if !device.visible_to(uid, admin) {
        return ApiErrorResponse::forbidden("device not visible to caller");
    }
    if let Some(required) = required_type {
        if device.device_type != required {
            return ApiErrorResponse::bad_request(format!(
                "device {id} is not a {}",
                required.label()
            ));
        }
    }

    device.merge_state(&delta);
    device.touch();
    if let Err(e) = ctx.store.put_device(&device) {
        return store_error(e);
    }

    if let Err(e) = ctx.publisher.publish_command(id, &delta).await {
        // State is committed; the device reconciles on its next report.
        warn!(device = id, error = %e, "command publish failed");
    }

    ApiResponse::ok(json!({"current_state": device.current_state}))
}

// ============================================================================
// Energy analysis
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EnergyQuery {
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub device_ids: Option<String>,
    #[serde(default)]
    pub uid: Option<u64>,
    #[serde(default)]
    pub admin: Option<bool>,
}

/// GET /api/energy/analysis — the full energy report over the caller's
/// visible devices, optionally narrowed to `device_ids=1,2,…`.
pub async fn energy_analysis(
    State(ctx): State<AppContext>,
    Query(query): Query<EnergyQuery>,
) -> Response {
    let caller = Caller {
        uid: query.uid,
        admin: query.admin,
    };
    let (uid, admin) = caller.resolved();

    let mut devices = match ctx.store.visible_devices(uid, admin) {
        Ok(devices) => devices,
        Err(e) => return store_error(e),
    };

    if let Some(ids) = &query.device_ids {
        let wanted: Vec<u64> = ids
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        devices.retain(|d| wanted.contains(&d.id));
    }

    let range = query.range.as_deref().unwrap_or("24h");
    let config = &crate::config::get().energy;
    match energy::build_energy_analysis(&ctx.store, &devices, range, Utc::now(), config) {
        Ok(report) => ApiResponse::ok(report),
        Err(e) => store_error(e),
    }
}

// ============================================================================
// Logs & bus status
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub uid: Option<u64>,
    #[serde(default)]
    pub admin: Option<bool>,
}

/// GET /api/logs — recent visible rows, newest first.
pub async fn list_logs(State(ctx): State<AppContext>, Query(query): Query<LogsQuery>) -> Response {
    let caller = Caller {
        uid: query.uid,
        admin: query.admin,
    };
    let (uid, admin) = caller.resolved();
    let limit = query.limit.unwrap_or(100).min(1000);
    match ctx.store.recent_logs(limit, uid, admin) {
        Ok(rows) => ApiResponse::ok(rows),
        Err(e) => store_error(e),
    }
}

/// GET /api/mqtt/status — current bus connectivity.
pub async fn mqtt_status(State(ctx): State<AppContext>) -> Response {
    ApiResponse::ok(json!({"connected": ctx.publisher.is_connected()}))
}

// ============================================================================
// Scene rules
// ============================================================================

/// GET /api/scenes — rules owned by the caller (admins see all).
pub async fn list_scene_rules(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
) -> Response {
    let (uid, admin) = caller.resolved();
    match ctx.store.list_scene_rules() {
        Ok(rules) => {
            let visible: Vec<SceneRule> = rules
                .into_iter()
                .filter(|r| admin || uid == Some(r.owner))
                .collect();
            ApiResponse::ok(visible)
        }
        Err(e) => store_error(e),
    }
}

/// POST /api/scenes — create a rule; conflicting saves are rejected with a
/// structured conflict list.
pub async fn create_scene_rule(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
    Json(draft): Json<SceneRuleDraft>,
) -> Response {
    let (uid, _) = caller.resolved();

    let (trigger, action) = match draft.validate() {
        Ok(parts) => parts,
        Err(e) => return ApiErrorResponse::bad_request(e.to_string()),
    };
    if let Err(resp) = require_devices(&ctx.store, &[draft.trigger_device, draft.action_device]) {
        return resp;
    }

    let id = match ctx.store.next_id() {
        Ok(id) => id,
        Err(e) => return store_error(e),
    };
    let now = Utc::now();
    let rule = SceneRule {
        id,
        name: draft.name.clone(),
        enabled: draft.enabled,
        owner: uid.unwrap_or(0),
        trigger_device: draft.trigger_device,
        trigger_field: draft.trigger_field.clone(),
        trigger,
        action_device: draft.action_device,
        action,
        debounce_seconds: draft.debounce_seconds,
        created_at: now,
        updated_at: now,
        last_triggered_at: None,
    };

    save_scene_rule_checked(&ctx.store, rule)
}

#[derive(Debug, Deserialize)]
pub struct SceneRuleUpdate {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub trigger_type: Option<String>,
    pub trigger_device: Option<u64>,
    pub trigger_field: Option<String>,
    pub trigger_value: Option<TriggerValue>,
    pub trigger_time_start: Option<NaiveTime>,
    pub trigger_time_end: Option<NaiveTime>,
    pub trigger_state_device: Option<u64>,
    pub trigger_state_value: Option<StateMap>,
    pub action_device: Option<u64>,
    pub action_type: Option<String>,
    pub action_value: Option<Value>,
    pub debounce_seconds: Option<i64>,
}

/// PUT /api/scenes/{id} — partial update; the merged rule is re-validated
/// and re-checked for conflicts (never against itself).
pub async fn update_scene_rule(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
    Path(id): Path<u64>,
    Json(update): Json<SceneRuleUpdate>,
) -> Response {
    let (uid, admin) = caller.resolved();
    let existing = match ctx.store.get_scene_rule(id) {
        Ok(Some(rule)) => rule,
        Ok(None) => return ApiErrorResponse::not_found(format!("scene rule {id} not found")),
        Err(e) => return store_error(e),
    };
    if !admin && uid != Some(existing.owner) {
        return ApiErrorResponse::forbidden("not the rule owner");
    }

    let mut draft = SceneRuleDraft::from_rule(&existing);
    if let Some(name) = update.name {
        draft.name = name;
    }
    if let Some(enabled) = update.enabled {
        draft.enabled = enabled;
    }
    if let Some(trigger_type) = update.trigger_type {
        draft.trigger_type = trigger_type;
    }
    if let Some(trigger_device) = update.trigger_device {
        draft.trigger_device = trigger_device;
    }
    if let Some(trigger_field) = update.trigger_field {
        draft.trigger_field = trigger_field;
    }
    if let Some(trigger_value) = update.trigger_value {
        draft.trigger_value = Some(trigger_value);
    }
    if let Some(start) = update.trigger_time_start {
        draft.trigger_time_start = Some(start);
    }
    if let Some(end) = update.trigger_time_end {
        draft.trigger_time_end = Some(end);
    }
    if let Some(state_device) = update.trigger_state_device {
        draft.trigger_state_device = Some(state_device);
    }
    if let Some(state_value) = update.trigger_state_value {
        draft.trigger_state_value = Some(state_value);
    }
    if let Some(action_device) = update.action_device {
        draft.action_device = action_device;
    }
    if let Some(action_type) = update.action_type {
        draft.action_type = action_type;
    }
    if let Some(action_value) = update.action_value {
        draft.action_value = Some(action_value);
    }
    if let Some(debounce) = update.debounce_seconds {
        draft.debounce_seconds = debounce;
    }

    let (trigger, action) = match draft.validate() {
        Ok(parts) => parts,
        Err(e) => return ApiErrorResponse::bad_request(e.to_string()),
    };
    if let Err(resp) = require_devices(&ctx.store, &[draft.trigger_device, draft.action_device]) {
        return resp;
    }

    let rule = SceneRule {
        id: existing.id,
        name: draft.name.clone(),
        enabled: draft.enabled,
        owner: existing.owner,
        trigger_device: draft.trigger_device,
        trigger_field: draft.trigger_field.clone(),
        trigger,
        action_device: draft.action_device,
        action,
        debounce_seconds: draft.debounce_seconds,
        created_at: existing.created_at,
        updated_at: Utc::now(),
        last_triggered_at: existing.last_triggered_at,
    };

    save_scene_rule_checked(&ctx.store, rule)
}

/// DELETE /api/scenes/{id}
pub async fn delete_scene_rule(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
    Path(id): Path<u64>,
) -> Response {
    let (uid, admin) = caller.resolved();
    match ctx.store.get_scene_rule(id) {
        Ok(Some(rule)) if admin || uid == Some(rule.owner) => {
            match ctx.store.delete_scene_rule(id) {
                Ok(()) => ApiResponse::ok(json!({"deleted": id})),
                Err(e) => store_error(e),
            }
        }
        Ok(Some(_)) => ApiErrorResponse::forbidden("not the rule owner"),
        Ok(None) => ApiErrorResponse::not_found(format!("scene rule {id} not found")),
        Err(e) => store_error(e),
    }
}

/// Run conflict detection, then persist. Conflicts reject the save with 409.
fn save_scene_rule_checked(store: &Store, rule: SceneRule) -> Response {
    let existing = match store.list_scene_rules() {
        Ok(rules) => rules,
        Err(e) => return store_error(e),
    };
    let conflicts = scenes::find_conflicts(&rule, &existing);
    if !conflicts.is_empty() {
        let body = json!({
            "error": {
                "code": "RULE_CONFLICT",
                "message": conflicts[0].message,
            },
            "conflicts": conflicts,
            "meta": super::envelope::ResponseMeta::default(),
        });
        return (axum::http::StatusCode::CONFLICT, Json(body)).into_response();
    }

    match store.put_scene_rule(&rule) {
        Ok(()) => ApiResponse::ok(rule),
        Err(e) => store_error(e),
    }
}

fn require_devices(store: &Store, ids: &[u64]) -> Result<(), Response> {
    for id in ids {
        match store.get_device(*id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(ApiErrorResponse::bad_request(format!(
                    "device {id} does not exist"
                )))
            }
            Err(e) => return Err(store_error(e)),
        }
    }
    Ok(())
}

// ============================================================================
// Email alert rules
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EmailRuleDraft {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub preset: AlertPreset,
    pub trigger_device: u64,
    pub trigger_field: String,
    #[serde(default)]
    pub trigger_value: Option<f64>,
    pub trigger_above: bool,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default = "default_subject_template")]
    pub subject_template: String,
    #[serde(default = "default_body_template")]
    pub body_template: String,
}

fn default_true() -> bool {
    true
}

fn default_subject_template() -> String {
    "[ALERT] {preset} - {device_name}".to_string()
}

fn default_body_template() -> String {
    "Device: {device_name}\nCondition: {preset}\nValue: {value}\nTime: {time}".to_string()
}

/// GET /api/alerts
pub async fn list_email_rules(State(ctx): State<AppContext>) -> Response {
    match ctx.store.list_email_rules() {
        Ok(rules) => ApiResponse::ok(rules),
        Err(e) => store_error(e),
    }
}

/// POST /api/alerts
pub async fn create_email_rule(
    State(ctx): State<AppContext>,
    Json(draft): Json<EmailRuleDraft>,
) -> Response {
    if let Err(resp) = require_devices(&ctx.store, &[draft.trigger_device]) {
        return resp;
    }
    let id = match ctx.store.next_id() {
        Ok(id) => id,
        Err(e) => return store_error(e),
    };
    let now = Utc::now();
    let rule = EmailAlertRule {
        id,
        name: draft.name,
        enabled: draft.enabled,
        preset: draft.preset,
        trigger_device: draft.trigger_device,
        trigger_field: draft.trigger_field,
        trigger_value: draft.trigger_value,
        trigger_above: draft.trigger_above,
        recipients: draft.recipients,
        cc: draft.cc,
        subject_template: draft.subject_template,
        body_template: draft.body_template,
        created_at: now,
        updated_at: now,
        last_triggered_at: None,
    };
    match ctx.store.put_email_rule(&rule) {
        Ok(()) => ApiResponse::ok(rule),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailRuleUpdate {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub preset: Option<AlertPreset>,
    pub trigger_device: Option<u64>,
    pub trigger_field: Option<String>,
    pub trigger_value: Option<Option<f64>>,
    pub trigger_above: Option<bool>,
    pub recipients: Option<Vec<String>>,
    pub cc: Option<Vec<String>>,
    pub subject_template: Option<String>,
    pub body_template: Option<String>,
}

/// PUT /api/alerts/{id}
pub async fn update_email_rule(
    State(ctx): State<AppContext>,
    Path(id): Path<u64>,
    Json(update): Json<EmailRuleUpdate>,
) -> Response {
    let mut rule = match ctx.store.get_email_rule(id) {
        Ok(Some(rule)) => rule,
        Ok(None) => return ApiErrorResponse::not_found(format!("email alert rule {id} not found")),
        Err(e) => return store_error(e),
    };

    if let Some(name) = update.name {
        rule.name = name;
    }
    if let Some(enabled) = update.enabled {
        rule.enabled = enabled;
    }
    if let Some(preset) = update.preset {
        rule.preset = preset;
    }
    if let Some(device) = update.trigger_device {
        if let Err(resp) = require_devices(&ctx.store, &[device]) {
            return resp;
        }
        rule.trigger_device = device;
    }
    if let Some(field) = update.trigger_field {
        rule.trigger_field = field;
    }
    if let Some(value) = update.trigger_value {
        rule.trigger_value = value;
    }
    if let Some(above) = update.trigger_above {
        rule.trigger_above = above;
    }
    if let Some(recipients) = update.recipients {
        rule.recipients = recipients;
    }
    if let Some(cc) = update.cc {
        rule.cc = cc;
    }
    if let Some(subject) = update.subject_template {
        rule.subject_template = subject;
    }
    if let Some(body) = update.body_template {
        rule.body_template = body;
    }
    rule.updated_at = Utc::now();

    match ctx.store.put_email_rule(&rule) {
        Ok(()) => ApiResponse::ok(rule),
        Err(e) => store_error(e),
    }
}

/// DELETE /api/alerts/{id}
pub async fn delete_email_rule(State(ctx): State<AppContext>, Path(id): Path<u64>) -> Response {
    match ctx.store.delete_email_rule(id) {
        Ok(()) => ApiResponse::ok(json!({"deleted": id})),
        Err(e) => store_error(e),
    }
}

// ============================================================================
// Realtime stream
// ============================================================================

/// GET /api/realtime/stream-token — issue a one-shot ticket for the caller.
pub async fn stream_token(
    State(ctx): State<AppContext>,
    Query(caller): Query<Caller>,
) -> Response {
    let (uid, admin) = caller.resolved();
    let token = ctx.tickets.issue(uid, admin);
    ApiResponse::ok(json!({
        "stream_token": token,
        "expires_in": ctx.tickets.ttl_seconds(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub stream_token: Option<String>,
}

/// GET /api/realtime/stream?stream_token=… — the SSE event stream.
pub async fn stream(
    State(ctx): State<AppContext>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let Some(token) = query.stream_token else {
        return ApiErrorResponse::unauthorized("missing stream_token");
    };
    let claims = match ctx.tickets.consume(&token) {
        Ok(claims) => claims,
        Err(e) => return ApiErrorResponse::unauthorized(e.to_string()),
    };

    let events = realtime::event_stream(ctx.store.clone(), ctx.publisher.clone(), claims);
    let mut response = Sse::new(events).into_response();
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}
