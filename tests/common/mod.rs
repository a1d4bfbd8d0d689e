//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hearthd::alerts::{MailError, MailTransport, OutgoingMail};
use hearthd::bus::{BusError, CommandPublisher};
use hearthd::config::{self, HomeConfig};
use hearthd::store::{NewDevice, Store};
use hearthd::types::{DeviceType, StateMap};

/// Store backed by a temp dir that lives as long as the returned guard.
pub fn temp_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("db")).unwrap();
    (store, dir)
}

/// Initialize the global config once, with defaults.
pub fn ensure_config() {
    if !config::is_initialized() {
        config::init(HomeConfig::default());
    }
}

/// Records every published command; connectivity is settable.
pub struct RecordingPublisher {
    pub commands: Mutex<Vec<(u64, StateMap)>>,
    pub connected: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    pub fn command_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandPublisher for RecordingPublisher {
    async fn publish_command(&self, device_id: u64, payload: &StateMap) -> Result<(), BusError> {
        self.commands.lock().unwrap().push((device_id, payload.clone()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Records every outgoing mail; optionally fails each send.
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingMail>>,
    pub fail: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MailTransport for RecordingMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Transport("smtp down".to_string()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

/// Register a device with the given type and initial state.
pub fn add_device(
    store: &Store,
    name: &str,
    device_type: DeviceType,
    initial_state: StateMap,
) -> hearthd::types::Device {
    store
        .insert_device(NewDevice {
            name: name.to_string(),
            device_type,
            location: String::new(),
            is_public: true,
            owner: None,
            initial_state,
        })
        .unwrap()
}

/// Build a state map from a JSON literal.
pub fn state(value: serde_json::Value) -> StateMap {
    serde_json::from_value(value).unwrap()
}
