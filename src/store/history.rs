//! Device history points.
//!
//! Key layout: `device_id BE (8) ++ timestamp_millis BE (8) ++ seq BE (8)`.
//! The trailing sequence number keeps duplicate timestamps (broker
//! redelivery, burst reports) as distinct rows while preserving
//! chronological iteration within a device's key range.

use chrono::{DateTime, TimeZone, Utc};

use super::{Store, StoreError};
use crate::types::{DeviceData, StateMap};

fn point_key(device_id: u64, ts_millis: i64, seq: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&device_id.to_be_bytes());
    // Wire timestamps are post-epoch; cast keeps BE ordering intact.
    key[8..16].copy_from_slice(&(ts_millis as u64).to_be_bytes());
    key[16..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn decode_point(key: &[u8], value: &[u8]) -> Result<DeviceData, StoreError> {
    let mut dev = [0u8; 8];
    dev.copy_from_slice(&key[..8]);
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&key[8..16]);
    let millis = u64::from_be_bytes(ts) as i64;
    let data: StateMap = serde_json::from_slice(value)?;
    Ok(DeviceData {
        device_id: u64::from_be_bytes(dev),
        timestamp: Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_else(Utc::now),
        data,
    })
}

impl Store {
    /// Append one history row for a device.
    pub fn append_point(
        &self,
        device_id: u64,
        timestamp: DateTime<Utc>,
        data: &StateMap,
    ) -> Result<(), StoreError> {
        let seq = self.next_id()?;
        let key = point_key(device_id, timestamp.timestamp_millis(), seq);
        let value = serde_json::to_vec(data)?;
        self.history_tree().insert(key, value)?;
        Ok(())
    }

    /// History rows for `device_id` with `start <= timestamp <= end`,
    /// ascending by timestamp.
    pub fn points_in_range(
        &self,
        device_id: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DeviceData>, StoreError> {
        let lo = point_key(device_id, start.timestamp_millis(), 0);
        let hi = point_key(device_id, end.timestamp_millis(), u64::MAX);

        let mut points = Vec::new();
        for item in self.history_tree().range(lo..=hi) {
            let (key, value) = item?;
            points.push(decode_point(&key, &value)?);
        }
        Ok(points)
    }

    /// The most recent row strictly before `cutoff` — the pre-baseline point
    /// the energy integrator starts from.
    pub fn latest_point_before(
        &self,
        device_id: u64,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<DeviceData>, StoreError> {
        let lo = point_key(device_id, 0, 0);
        // Strictly before: everything up to cutoff_millis - 1, any seq.
        let cutoff_millis = cutoff.timestamp_millis();
        if cutoff_millis <= 0 {
            return Ok(None);
        }
        let hi = point_key(device_id, cutoff_millis - 1, u64::MAX);

        match self.history_tree().range(lo..=hi).next_back() {
            Some(item) => {
                let (key, value) = item?;
                Ok(Some(decode_point(&key, &value)?))
            }
            None => Ok(None),
        }
    }

    /// Remove all history rows for a device (cascade from device delete).
    pub(crate) fn delete_history_for_device(&self, device_id: u64) -> Result<(), StoreError> {
        let lo = point_key(device_id, 0, 0);
        let hi = point_key(device_id, i64::MAX, u64::MAX);

        let keys: Vec<_> = self
            .history_tree()
            .range(lo..=hi)
            .filter_map(|item| item.ok().map(|(k, _)| k))
            .collect();
        for key in keys {
            self.history_tree().remove(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_store;
    use super::*;
    use serde_json::json;

    fn state(temp: i64) -> StateMap {
        let mut m = StateMap::new();
        m.insert("temp".to_string(), json!(temp));
        m
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_range_query_is_ascending_and_inclusive() {
        let (store, _dir) = temp_store();
        for (i, secs) in [300, 100, 200].iter().enumerate() {
            store.append_point(1, at(*secs), &state(i as i64)).unwrap();
        }

        let points = store.points_in_range(1, at(100), at(300)).unwrap();
        assert_eq!(points.len(), 3);
        assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let partial = store.points_in_range(1, at(100), at(200)).unwrap();
        assert_eq!(partial.len(), 2);
    }

    #[test]
    fn test_duplicate_timestamps_kept_as_distinct_rows() {
        let (store, _dir) = temp_store();
        store.append_point(1, at(50), &state(1)).unwrap();
        store.append_point(1, at(50), &state(1)).unwrap();

        let points = store.points_in_range(1, at(0), at(100)).unwrap();
        assert_eq!(points.len(), 2);
    }

    #[test]
    fn test_devices_do_not_bleed_into_each_other() {
        let (store, _dir) = temp_store();
        store.append_point(1, at(10), &state(1)).unwrap();
        store.append_point(2, at(10), &state(2)).unwrap();

        let points = store.points_in_range(1, at(0), at(100)).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].device_id, 1);
    }

    #[test]
    fn test_latest_point_before_is_strict() {
        let (store, _dir) = temp_store();
        store.append_point(1, at(100), &state(1)).unwrap();
        store.append_point(1, at(200), &state(2)).unwrap();

        let baseline = store.latest_point_before(1, at(200)).unwrap().unwrap();
        assert_eq!(baseline.timestamp, at(100));

        assert!(store.latest_point_before(1, at(100)).unwrap().is_none());
    }
}
