//! Manages the lifecycle of per-device coordinator tasks and exposes the
//! operational control surface: value/command access for the entity layer
//! plus reload, register removal and performance services.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use domain::error::{DomainError, Result};
use domain::plan::RegisterGroup;
use domain::register::{EntityValue, RegisterSpec, Value};
use domain::{DeviceContext, Transport};

use crate::cache::ValueCache;
use crate::coordinator::{DeviceCoordinator, DeviceSettings, DeviceState};
use crate::error_tracker::ErrorTracker;
use crate::performance::{PerformanceMonitor, PerformanceSummary};

/// Criteria for `remove_registers`; set fields combine with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterSelector {
    pub unique_id: Option<String>,
    pub category: Option<String>,
    pub slave_id: Option<u8>,
}

impl RegisterSelector {
    pub fn by_unique_id(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: Some(unique_id.into()),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.unique_id.is_none() && self.category.is_none() && self.slave_id.is_none()
    }

    fn matches(&self, spec: &RegisterSpec) -> bool {
        if let Some(unique_id) = &self.unique_id {
            if !spec.unique_id.eq_ignore_ascii_case(unique_id) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if spec.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if let Some(slave_id) = self.slave_id {
            if spec.slave_id != Some(slave_id) {
                return false;
            }
        }
        true
    }
}

struct DeviceEntry {
    coordinator: DeviceCoordinator,
    handle: JoinHandle<()>,
}

/// Owns every configured device's coordinator task. One instance per
/// process; the cache, error tracker and performance monitor are shared so
/// cross-device dependency lookups and global summaries work.
pub struct AcquisitionManager {
    devices: Mutex<HashMap<String, DeviceEntry>>,
    cache: Arc<ValueCache>,
    errors: Arc<ErrorTracker>,
    performance: Arc<PerformanceMonitor>,
}

impl Default for AcquisitionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionManager {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            cache: Arc::new(ValueCache::new()),
            errors: Arc::new(ErrorTracker::new()),
            performance: Arc::new(PerformanceMonitor::new()),
        }
    }

    pub fn cache(&self) -> Arc<ValueCache> {
        self.cache.clone()
    }

    /// Set up one device and start its polling task. Template problems are
    /// returned as `Config` errors and the device does not go live; an
    /// unreachable host is not an error here (offline-first).
    pub async fn setup_device(
        &self,
        context: DeviceContext,
        template: Vec<RegisterSpec>,
        settings: DeviceSettings,
        transport: Box<dyn Transport>,
    ) -> Result<()> {
        let device_id = context.prefix.clone();
        let mut devices = self.devices.lock().await;
        if devices.contains_key(&device_id) {
            return Err(DomainError::Config(format!(
                "device '{device_id}' is already configured"
            )));
        }

        let coordinator = DeviceCoordinator::new(
            context,
            template,
            settings,
            transport,
            self.cache.clone(),
            self.errors.clone(),
            self.performance.clone(),
        )?;

        let task = coordinator.clone();
        let handle = tokio::spawn(async move {
            task.run().await;
        });

        devices.insert(
            device_id.clone(),
            DeviceEntry {
                coordinator,
                handle,
            },
        );
        info!(device_id = %device_id, "Device registered");
        Ok(())
    }

    async fn coordinator(&self, device: &str) -> Result<DeviceCoordinator> {
        let devices = self.devices.lock().await;
        devices
            .get(device)
            .map(|entry| entry.coordinator.clone())
            .ok_or_else(|| DomainError::DeviceNotFound(device.to_string()))
    }

    pub async fn device_state(&self, device: &str) -> Result<DeviceState> {
        Ok(self.coordinator(device).await?.state())
    }

    /// Snapshot of one entity's cached state.
    pub async fn get_value(&self, device: &str, unique_id: &str) -> Option<EntityValue> {
        self.cache.get(device, unique_id)
    }

    /// Device-agnostic lookup for entity layers that only know the
    /// unique_id.
    pub async fn find_value(&self, unique_id: &str) -> Option<EntityValue> {
        self.cache.find(unique_id)
    }

    /// Execute a write command; the transport outcome is returned
    /// synchronously.
    pub async fn command(&self, device: &str, unique_id: &str, value: Value) -> Result<()> {
        self.coordinator(device).await?.command(unique_id, value).await
    }

    /// Diagnostic view of a device's active read plan.
    pub async fn get_group_plan(&self, device: &str) -> Result<Vec<RegisterGroup>> {
        Ok(self.coordinator(device).await?.group_plan())
    }

    /// Rebuild and atomically swap the configuration generation for one
    /// device, or for all devices when None.
    pub async fn reload(&self, device: Option<&str>) -> Result<()> {
        match device {
            Some(id) => self.coordinator(id).await?.reload(),
            None => {
                let devices = self.devices.lock().await;
                for (id, entry) in devices.iter() {
                    if let Err(e) = entry.coordinator.reload() {
                        warn!(device_id = %id, "Reload failed: {e}");
                        return Err(e);
                    }
                }
                Ok(())
            }
        }
    }

    /// Replace a device's template (e.g. after the loader re-read it) and
    /// activate the resulting generation.
    pub async fn reload_template(
        &self,
        device: &str,
        template: Vec<RegisterSpec>,
    ) -> Result<()> {
        self.coordinator(device).await?.update_template(template)
    }

    /// Drop matching specs from a device's template and recompute its
    /// groups. Returns how many specs were removed.
    pub async fn remove_registers(
        &self,
        device: &str,
        selector: &RegisterSelector,
    ) -> Result<usize> {
        if selector.is_empty() {
            return Err(DomainError::Config(
                "remove_registers requires at least one selector field".into(),
            ));
        }
        let removed = self
            .coordinator(device)
            .await?
            .remove_registers(|spec| selector.matches(spec))?;
        if removed == 0 {
            warn!(device_id = %device, "remove_registers matched nothing");
        }
        Ok(removed)
    }

    pub async fn get_performance(&self, device: Option<&str>) -> PerformanceSummary {
        self.performance.summary(device)
    }

    pub async fn reset_performance(&self, device: Option<&str>) {
        self.performance.reset(device);
    }

    /// Stop one device's polling task, discard in-flight results and drop
    /// its cached state.
    pub async fn unload_device(&self, device: &str) -> Result<()> {
        let entry = {
            let mut devices = self.devices.lock().await;
            devices
                .remove(device)
                .ok_or_else(|| DomainError::DeviceNotFound(device.to_string()))?
        };
        entry.coordinator.shutdown();
        if entry.handle.await.is_err() {
            warn!(device_id = %device, "Device task ended abnormally");
        }
        self.cache.remove_device(device);
        self.errors.clear_device(device);
        info!(device_id = %device, "Device unloaded");
        Ok(())
    }

    /// Stop every device task.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, DeviceEntry)> = {
            let mut devices = self.devices.lock().await;
            devices.drain().collect()
        };
        for (id, entry) in entries {
            info!(device_id = %id, "Stopping device coordinator");
            entry.coordinator.shutdown();
            let _ = entry.handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matching() {
        let spec = RegisterSpec::new("Battery_SOC", 13022).with_slave(200);
        assert!(RegisterSelector::by_unique_id("battery_soc").matches(&spec));
        assert!(!RegisterSelector::by_unique_id("other").matches(&spec));

        let selector = RegisterSelector {
            unique_id: Some("battery_soc".into()),
            slave_id: Some(1),
            ..RegisterSelector::default()
        };
        assert!(!selector.matches(&spec));

        let selector = RegisterSelector {
            slave_id: Some(200),
            ..RegisterSelector::default()
        };
        assert!(selector.matches(&spec));
    }

    #[test]
    fn test_empty_selector_is_rejected_shape() {
        assert!(RegisterSelector::default().is_empty());
        assert!(!RegisterSelector::by_unique_id("x").is_empty());
    }
}
