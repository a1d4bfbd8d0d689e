//! Telemetry gateway end-to-end: topic parsing, state merge, LWT
//! transitions, history rows, and engine fan-out.

mod common;

use common::{add_device, state, temp_store, RecordingMailer, RecordingPublisher};
use chrono::{Duration, Utc};
use hearthd::bus::BusMessage;
use hearthd::gateway::Gateway;
use hearthd::types::{AlertPreset, DeviceType, EmailAlertRule, LogLevel, LogSource};
use serde_json::json;

fn message(topic: &str, payload: serde_json::Value) -> BusMessage {
    BusMessage {
        topic: topic.to_string(),
        payload: serde_json::to_vec(&payload).unwrap(),
    }
}

fn raw_message(topic: &str, payload: &[u8]) -> BusMessage {
    BusMessage {
        topic: topic.to_string(),
        payload: payload.to_vec(),
    }
}

fn gateway(store: &hearthd::store::Store) -> (Gateway, std::sync::Arc<RecordingPublisher>, std::sync::Arc<RecordingMailer>) {
    let publisher = RecordingPublisher::new();
    let mailer = RecordingMailer::new();
    (
        Gateway::new(store.clone(), publisher.clone(), mailer.clone()),
        publisher,
        mailer,
    )
}

#[tokio::test]
async fn test_state_message_merges_and_records_history() {
    let (store, _dir) = temp_store();
    let sensor = add_device(
        &store,
        "sensor",
        DeviceType::TempHumi,
        state(json!({"humi": 50})),
    );
    let (gw, _, _) = gateway(&store);

    gw.handle_message(&message(
        &format!("home/{}/state", sensor.id),
        json!({"temp": 26.5}),
    ))
    .await;

    let after = store.get_device(sensor.id).unwrap().unwrap();
    // Key-level merge: old keys survive, new keys land.
    assert_eq!(after.current_state["humi"], json!(50));
    assert_eq!(after.current_state["temp"], json!(26.5));
    assert!(after.is_online);

    let points = store
        .points_in_range(sensor.id, Utc::now() - Duration::minutes(1), Utc::now())
        .unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].data["temp"], json!(26.5));

    let logs = store.recent_logs(10, None, true).unwrap();
    assert!(logs
        .iter()
        .any(|l| l.source == LogSource::MqttGateway && l.message.contains("temp 26.5°C")));
}

#[tokio::test]
async fn test_duplicate_state_is_idempotent_for_current_state() {
    let (store, _dir) = temp_store();
    let sensor = add_device(&store, "sensor", DeviceType::TempHumi, state(json!({})));
    let (gw, _, _) = gateway(&store);

    let msg = message(&format!("home/{}/state", sensor.id), json!({"temp": 22}));
    gw.handle_message(&msg).await;
    let state_once = store.get_device(sensor.id).unwrap().unwrap().current_state;
    gw.handle_message(&msg).await;
    let state_twice = store.get_device(sensor.id).unwrap().unwrap().current_state;

    assert_eq!(state_once, state_twice);

    // But two history rows and two log rows exist.
    let points = store
        .points_in_range(sensor.id, Utc::now() - Duration::minutes(1), Utc::now())
        .unwrap();
    assert_eq!(points.len(), 2);
    let state_logs: Vec<_> = store
        .recent_logs(20, None, true)
        .unwrap()
        .into_iter()
        .filter(|l| l.message.contains("state updated"))
        .collect();
    assert_eq!(state_logs.len(), 2);
}

#[tokio::test]
async fn test_unknown_device_dropped_with_warn() {
    let (store, _dir) = temp_store();
    let (gw, _, _) = gateway(&store);

    gw.handle_message(&message("home/9999/state", json!({"temp": 22}))).await;

    let logs = store.recent_logs(10, None, true).unwrap();
    assert!(logs
        .iter()
        .any(|l| l.level == LogLevel::Warn && l.message.contains("9999")));
    // Never creates devices implicitly.
    assert!(store.get_device(9999).unwrap().is_none());
}

#[tokio::test]
async fn test_malformed_topic_and_payload_dropped() {
    let (store, _dir) = temp_store();
    let sensor = add_device(&store, "sensor", DeviceType::TempHumi, state(json!({})));
    let (gw, _, _) = gateway(&store);

    gw.handle_message(&raw_message("home/state", b"{}")).await;
    gw.handle_message(&raw_message("home/abc/state", b"{}")).await;
    gw.handle_message(&raw_message(
        &format!("home/{}/state", sensor.id),
        b"not json",
    ))
    .await;
    gw.handle_message(&raw_message(&format!("home/{}/state", sensor.id), b"[1,2]"))
        .await;

    // Device untouched in all four cases.
    let after = store.get_device(sensor.id).unwrap().unwrap();
    assert!(after.current_state.is_empty());
    assert!(!after.is_online);

    let warns = store
        .recent_logs(20, None, true)
        .unwrap()
        .into_iter()
        .filter(|l| l.level == LogLevel::Warn)
        .count();
    assert_eq!(warns, 4);
}

#[tokio::test]
async fn test_lwt_transitions() {
    let (store, _dir) = temp_store();
    let mut lamp = add_device(&store, "lamp", DeviceType::LampSwitch, state(json!({"on": true})));
    lamp.is_online = true;
    store.put_device(&lamp).unwrap();
    let (gw, _, mailer) = gateway(&store);

    gw.handle_message(&raw_message(&format!("home/{}/lwt", lamp.id), b"offline"))
        .await;
    let after = store.get_device(lamp.id).unwrap().unwrap();
    assert!(!after.is_online);
    // State untouched by LWT.
    assert_eq!(after.current_state["on"], json!(true));

    gw.handle_message(&raw_message(&format!("home/{}/lwt", lamp.id), b"online"))
        .await;
    assert!(store.get_device(lamp.id).unwrap().unwrap().is_online);

    let logs = store.recent_logs(10, None, true).unwrap();
    assert!(logs
        .iter()
        .any(|l| l.level == LogLevel::Warn && l.message.contains("offline")));
    assert!(logs
        .iter()
        .any(|l| l.level == LogLevel::Info && l.message.contains("online")));

    // LWT never reaches the engines.
    assert_eq!(mailer.sent_count(), 0);
    // And no history rows were appended.
    let points = store
        .points_in_range(lamp.id, Utc::now() - Duration::minutes(1), Utc::now())
        .unwrap();
    assert!(points.is_empty());
}

#[tokio::test]
async fn test_smoke_report_triggers_boolean_alert() {
    let (store, _dir) = temp_store();
    let smoke = add_device(&store, "kitchen smoke", DeviceType::Smoke, state(json!({})));

    let now = Utc::now();
    let rule = EmailAlertRule {
        id: store.next_id().unwrap(),
        name: "smoke!".to_string(),
        enabled: true,
        preset: AlertPreset::Smoke,
        trigger_device: smoke.id,
        trigger_field: "smoke".to_string(),
        trigger_value: None,
        trigger_above: true,
        recipients: vec!["ops@example.com".to_string()],
        cc: vec![],
        subject_template: "{preset} - {device_name}".to_string(),
        body_template: "{value}".to_string(),
        created_at: now,
        updated_at: now,
        last_triggered_at: None,
    };
    store.put_email_rule(&rule).unwrap();

    let (gw, _, mailer) = gateway(&store);

    gw.handle_message(&message(
        &format!("home/{}/state", smoke.id),
        json!({"smoke": true}),
    ))
    .await;
    assert_eq!(mailer.sent_count(), 1);

    // A clear report does not re-fire.
    gw.handle_message(&message(
        &format!("home/{}/state", smoke.id),
        json!({"smoke": false}),
    ))
    .await;
    assert_eq!(mailer.sent_count(), 1);
}

#[tokio::test]
async fn test_state_report_triggers_scene_rule_through_gateway() {
    let (store, _dir) = temp_store();
    let sensor = add_device(&store, "sensor", DeviceType::TempHumi, state(json!({})));
    let mut ac = add_device(&store, "ac", DeviceType::AcSwitch, state(json!({})));
    ac.is_online = true;
    store.put_device(&ac).unwrap();

    let now = Utc::now();
    let rule = hearthd::types::SceneRule {
        id: store.next_id().unwrap(),
        name: "hot -> ac".to_string(),
        enabled: true,
        owner: 1,
        trigger_device: sensor.id,
        trigger_field: "temp".to_string(),
        trigger: hearthd::types::TriggerKind::ThresholdAbove { threshold: 28.0 },
        action_device: ac.id,
        action: hearthd::types::ActionKind::TurnOn,
        debounce_seconds: 60,
        created_at: now,
        updated_at: now,
        last_triggered_at: None,
    };
    store.put_scene_rule(&rule).unwrap();

    let (gw, publisher, _) = gateway(&store);
    gw.handle_message(&message(
        &format!("home/{}/state", sensor.id),
        json!({"temp": 30.5}),
    ))
    .await;

    assert_eq!(publisher.command_count(), 1);
    let ac_after = store.get_device(ac.id).unwrap().unwrap();
    assert_eq!(ac_after.current_state["on"], json!(true));
}

#[tokio::test]
async fn test_power_topic_merges_without_log_or_engines() {
    let (store, _dir) = temp_store();
    let ac = add_device(&store, "ac", DeviceType::AcSwitch, state(json!({"on": true})));
    let (gw, _, mailer) = gateway(&store);

    gw.handle_message(&message(
        &format!("home/{}/power", ac.id),
        json!({"power_w": 850, "energy_wh_total": 12000}),
    ))
    .await;

    let after = store.get_device(ac.id).unwrap().unwrap();
    assert_eq!(after.current_state["power_w"], json!(850));
    assert!(after.is_online);

    let points = store
        .points_in_range(ac.id, Utc::now() - Duration::minutes(1), Utc::now())
        .unwrap();
    assert_eq!(points.len(), 1);

    // No SystemLog row and no alert evaluation for power telemetry.
    let logs = store.recent_logs(10, None, true).unwrap();
    assert!(logs.iter().all(|l| l.source != LogSource::MqttGateway || !l.message.contains("state updated")));
    assert_eq!(mailer.sent_count(), 0);
}
