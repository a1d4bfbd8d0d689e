//! Embedded persistence for devices, history points, system logs, and rules.
//!
//! One sled database with a tree per entity. Integer keys are stored
//! big-endian so iteration order is chronological / id order, the same trick
//! the history queries and the realtime log tail rely on.

mod devices;
mod history;
mod logs;
mod rules;

pub use devices::NewDevice;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0} {1} not found")]
    NotFound(&'static str, u64),
}

/// Handle to all persisted state. Cheap to clone; all clones share the
/// same underlying database.
#[derive(Clone)]
pub struct Store {
    db: Arc<sled::Db>,
    devices: sled::Tree,
    history: sled::Tree,
    logs: sled::Tree,
    scene_rules: sled::Tree,
    email_rules: sled::Tree,
}

impl Store {
    /// Open or create the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            devices: db.open_tree("devices")?,
            history: db.open_tree("device_data")?,
            logs: db.open_tree("system_logs")?,
            scene_rules: db.open_tree("scene_rules")?,
            email_rules: db.open_tree("email_alert_rules")?,
            db: Arc::new(db),
        })
    }

    /// Next id from the database's monotonic counter.
    ///
    /// Shared across entity kinds; ids are unique and strictly increasing,
    /// which is all the log tail needs.
    pub fn next_id(&self) -> Result<u64, StoreError> {
        Ok(self.db.generate_id()?)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn devices_tree(&self) -> &sled::Tree {
        &self.devices
    }

    pub(crate) fn history_tree(&self) -> &sled::Tree {
        &self.history
    }

    pub(crate) fn logs_tree(&self) -> &sled::Tree {
        &self.logs
    }

    pub(crate) fn scene_rules_tree(&self) -> &sled::Tree {
        &self.scene_rules
    }

    pub(crate) fn email_rules_tree(&self) -> &sled::Tree {
        &self.email_rules
    }
}

/// Big-endian key for a plain id-keyed row.
pub(crate) fn id_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Store;

    /// Store backed by a temp dir that lives as long as the returned guard.
    pub fn temp_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("db")).unwrap();
        (store, dir)
    }
}
