//! Scene rule and email alert rule rows.

use chrono::{DateTime, Utc};

use super::{id_key, Store, StoreError};
use crate::types::{EmailAlertRule, SceneRule};

impl Store {
    // ------------------------------------------------------------------
    // Scene rules
    // ------------------------------------------------------------------

    pub fn put_scene_rule(&self, rule: &SceneRule) -> Result<(), StoreError> {
        let value = serde_json::to_vec(rule)?;
        self.scene_rules_tree().insert(id_key(rule.id), value)?;
        Ok(())
    }

    pub fn get_scene_rule(&self, id: u64) -> Result<Option<SceneRule>, StoreError> {
        match self.scene_rules_tree().get(id_key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_scene_rules(&self) -> Result<Vec<SceneRule>, StoreError> {
        let mut rules = Vec::new();
        for item in self.scene_rules_tree().iter() {
            let (_, value) = item?;
            rules.push(serde_json::from_slice(&value)?);
        }
        Ok(rules)
    }

    /// Enabled rules watching the given trigger device — the engine's
    /// per-message selection.
    pub fn scene_rules_for_trigger(&self, device_id: u64) -> Result<Vec<SceneRule>, StoreError> {
        Ok(self
            .list_scene_rules()?
            .into_iter()
            .filter(|r| r.enabled && r.trigger_device == device_id)
            .collect())
    }

    pub fn delete_scene_rule(&self, id: u64) -> Result<(), StoreError> {
        if self.scene_rules_tree().remove(id_key(id))?.is_none() {
            return Err(StoreError::NotFound("scene rule", id));
        }
        Ok(())
    }

    /// Record a firing time after the action ran.
    pub fn stamp_scene_rule_triggered(
        &self,
        id: u64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut rule = self
            .get_scene_rule(id)?
            .ok_or(StoreError::NotFound("scene rule", id))?;
        rule.last_triggered_at = Some(at);
        self.put_scene_rule(&rule)
    }

    // ------------------------------------------------------------------
    // Email alert rules
    // ------------------------------------------------------------------

    pub fn put_email_rule(&self, rule: &EmailAlertRule) -> Result<(), StoreError> {
        let value = serde_json::to_vec(rule)?;
        self.email_rules_tree().insert(id_key(rule.id), value)?;
        Ok(())
    }

    pub fn get_email_rule(&self, id: u64) -> Result<Option<EmailAlertRule>, StoreError> {
        match self.email_rules_tree().get(id_key(id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_email_rules(&self) -> Result<Vec<EmailAlertRule>, StoreError> {
        let mut rules = Vec::new();
        for item in self.email_rules_tree().iter() {
            let (_, value) = item?;
            rules.push(serde_json::from_slice(&value)?);
        }
        Ok(rules)
    }

    /// Enabled rules matching `(trigger_device, trigger_field)` — the alert
    /// engine's per-field selection.
    pub fn email_rules_for_field(
        &self,
        device_id: u64,
        field: &str,
    ) -> Result<Vec<EmailAlertRule>, StoreError> {
        Ok(self
            .list_email_rules()?
            .into_iter()
            .filter(|r| r.enabled && r.trigger_device == device_id && r.trigger_field == field)
            .collect())
    }

    pub fn delete_email_rule(&self, id: u64) -> Result<(), StoreError> {
        if self.email_rules_tree().remove(id_key(id))?.is_none() {
            return Err(StoreError::NotFound("email alert rule", id));
        }
        Ok(())
    }

    pub fn stamp_email_rule_triggered(
        &self,
        id: u64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut rule = self
            .get_email_rule(id)?
            .ok_or(StoreError::NotFound("email alert rule", id))?;
        rule.last_triggered_at = Some(at);
        self.put_email_rule(&rule)
    }
}
