//! Append-only system log rows with a monotonic id for resumable tailing.

use chrono::Utc;
use serde_json::Value;

use super::{id_key, Store, StoreError};
use crate::types::{LogLevel, LogSource, SystemLog};

impl Store {
    /// Append a log row and return it with its assigned id.
    pub fn append_log(
        &self,
        level: LogLevel,
        source: LogSource,
        message: impl Into<String>,
        data: Option<Value>,
        user: Option<u64>,
    ) -> Result<SystemLog, StoreError> {
        let row = SystemLog {
            id: self.next_id()?,
            level,
            source,
            message: message.into(),
            data,
            user,
            created_at: Utc::now(),
        };
        let value = serde_json::to_vec(&row)?;
        self.logs_tree().insert(id_key(row.id), value)?;
        Ok(row)
    }

    /// The highest assigned log id, or 0 when the log is empty.
    pub fn latest_log_id(&self) -> Result<u64, StoreError> {
        match self.logs_tree().last()? {
            Some((key, _)) => {
                let mut id = [0u8; 8];
                id.copy_from_slice(&key);
                Ok(u64::from_be_bytes(id))
            }
            None => Ok(0),
        }
    }

    /// Rows visible to the caller with `id > after`, ascending, capped at
    /// `limit`. This is the realtime fan-out's tail query.
    pub fn logs_after(
        &self,
        after: u64,
        limit: usize,
        uid: Option<u64>,
        admin: bool,
    ) -> Result<Vec<SystemLog>, StoreError> {
        let lo = id_key(after.saturating_add(1));
        let mut rows = Vec::new();
        for item in self.logs_tree().range(lo[..].to_vec()..) {
            if rows.len() >= limit {
                break;
            }
            let (_, value) = item?;
            let row: SystemLog = serde_json::from_slice(&value)?;
            if row.visible_to(uid, admin) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// The most recent visible rows, newest first, for the debug page.
    pub fn recent_logs(
        &self,
        limit: usize,
        uid: Option<u64>,
        admin: bool,
    ) -> Result<Vec<SystemLog>, StoreError> {
        let mut rows = Vec::new();
        for item in self.logs_tree().iter().rev() {
            if rows.len() >= limit {
                break;
            }
            let (_, value) = item?;
            let row: SystemLog = serde_json::from_slice(&value)?;
            if row.visible_to(uid, admin) {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}
