//! Device rows: CRUD, visibility, and the fan-out change signature.

use chrono::{DateTime, Utc};

use super::{id_key, Store, StoreError};
use crate::types::{Device, DeviceType, StateMap, TriggerKind};

/// Fields supplied when registering a new device.
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub name: String,
    pub device_type: DeviceType,
    pub location: String,
    pub is_public: bool,
    pub owner: Option<u64>,
    pub initial_state: StateMap,
}

impl Store {
    /// Register a new device and return the stored row.
    pub fn insert_device(&self, new: NewDevice) -> Result<Device, StoreError> {
        let now = Utc::now();
        let device = Device {
            id: self.next_id()?,
            name: new.name,
            device_type: new.device_type,
            location: new.location,
            is_online: false,
            is_public: new.is_public,
            owner: new.owner,
            current_state: new.initial_state,
            created_at: now,
            updated_at: now,
        };
        self.put_device(&device)?;
        Ok(device)
    }

    /// Overwrite a device row. Callers mutate a fetched copy (via
    /// [`Device::touch`] for `updated_at`) and write it back.
    pub fn put_device(&self, device: &Device) -> Result<(), StoreError> {
        let value = serde_json::to_vec(device)?;
        self.devices_tree().insert(id_key(device.id), value)?;
        Ok(())
    }

    pub fn get_device(&self, id: u64) -> Result<Option<Device>, StoreError> {
        match self.devices_tree().get(id_key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`get_device`](Self::get_device) but unknown ids are an error.
    pub fn require_device(&self, id: u64) -> Result<Device, StoreError> {
        self.get_device(id)?
            .ok_or(StoreError::NotFound("device", id))
    }

    /// All devices, ascending by id.
    pub fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let mut devices = Vec::new();
        for item in self.devices_tree().iter() {
            let (_, value) = item?;
            devices.push(serde_json::from_slice(&value)?);
        }
        Ok(devices)
    }

    /// Devices visible to the given caller, ascending by id.
    pub fn visible_devices(&self, uid: Option<u64>, admin: bool) -> Result<Vec<Device>, StoreError> {
        Ok(self
            .list_devices()?
            .into_iter()
            .filter(|d| d.visible_to(uid, admin))
            .collect())
    }

    /// Delete a device and everything that hangs off it: history points,
    /// scene rules that trigger on or act on it, and email alert rules.
    /// Scene rules that merely reference it as a state device are kept with
    /// the reference cleared.
    pub fn delete_device(&self, id: u64) -> Result<(), StoreError> {
        if self.devices_tree().remove(id_key(id))?.is_none() {
            return Err(StoreError::NotFound("device", id));
        }

        self.delete_history_for_device(id)?;

        for mut rule in self.list_scene_rules()? {
            if rule.trigger_device == id || rule.action_device == id {
                self.delete_scene_rule(rule.id)?;
            } else if let TriggerKind::TimeState {
                ref mut state_device,
                ..
            } = rule.trigger
            {
                if *state_device == Some(id) {
                    *state_device = None;
                    rule.updated_at = Utc::now();
                    self.put_scene_rule(&rule)?;
                }
            }
        }

        for rule in self.list_email_rules()? {
            if rule.trigger_device == id {
                self.delete_email_rule(rule.id)?;
            }
        }

        Ok(())
    }

    /// Cheap change signature over the visible device set:
    /// `"<count>|<max updated_at RFC3339>"`. The realtime fan-out compares
    /// successive signatures instead of diffing full device lists.
    pub fn device_signature(&self, uid: Option<u64>, admin: bool) -> Result<String, StoreError> {
        let devices = self.visible_devices(uid, admin)?;
        let max_updated: Option<DateTime<Utc>> = devices.iter().map(|d| d.updated_at).max();
        Ok(format!(
            "{}|{}",
            devices.len(),
            max_updated.map(|t| t.to_rfc3339()).unwrap_or_default()
        ))
    }
}
