//! The live entity value cache.
//!
//! Single-writer per device: only that device's coordinator task mutates its
//! entries. Readers (the entity layer, cross-device dependency resolution)
//! always receive cloned snapshots, never a live reference into the map.

use std::collections::HashMap;

use dashmap::DashMap;
use domain::register::EntityValue;

#[derive(Debug, Default)]
pub struct ValueCache {
    inner: DashMap<(String, String), EntityValue>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one entity's state.
    pub fn get(&self, device: &str, unique_id: &str) -> Option<EntityValue> {
        self.inner
            .get(&(device.to_string(), unique_id.to_string()))
            .map(|e| e.clone())
    }

    /// Cross-device lookup by unique_id: exact match first, then
    /// case-insensitive (prefixes are lowercased in some templates).
    pub fn find(&self, unique_id: &str) -> Option<EntityValue> {
        for entry in self.inner.iter() {
            if entry.key().1 == unique_id {
                return Some(entry.value().clone());
            }
        }
        let folded = unique_id.to_lowercase();
        for entry in self.inner.iter() {
            if entry.key().1.to_lowercase() == folded {
                return Some(entry.value().clone());
            }
        }
        None
    }

    pub fn insert(&self, device: &str, value: EntityValue) {
        self.inner
            .insert((device.to_string(), value.unique_id.clone()), value);
    }

    /// Flag an entity unavailable, keeping its last value for diagnostics.
    pub fn mark_unavailable(&self, device: &str, unique_id: &str) {
        let key = (device.to_string(), unique_id.to_string());
        match self.inner.get_mut(&key) {
            Some(mut entry) => entry.mark_unavailable(),
            None => {
                self.inner.insert(key, EntityValue::unavailable(unique_id));
            }
        }
    }

    pub fn remove(&self, device: &str, unique_id: &str) {
        self.inner
            .remove(&(device.to_string(), unique_id.to_string()));
    }

    /// All entries for one device, keyed by unique_id.
    pub fn snapshot_device(&self, device: &str) -> HashMap<String, EntityValue> {
        self.inner
            .iter()
            .filter(|e| e.key().0 == device)
            .map(|e| (e.key().1.clone(), e.value().clone()))
            .collect()
    }

    pub fn remove_device(&self, device: &str) {
        self.inner.retain(|key, _| key.0 != device);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
