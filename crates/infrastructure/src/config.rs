use std::collections::HashMap;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use domain::context::{ContextValue, DeviceContext};

/// Connection settings for one hub endpoint, shared by its devices.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HubConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Pause between consecutive reads on the shared connection.
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default = "default_max_batch_words")]
    pub max_batch_words: u16,
    #[serde(default = "default_gap_merge_threshold")]
    pub gap_merge_threshold: u16,
}

fn default_port() -> u16 {
    502
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_request_timeout_ms() -> u64 {
    3000
}
fn default_max_batch_words() -> u16 {
    125
}
fn default_gap_merge_threshold() -> u16 {
    8
}

/// One configured device behind the hub.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    /// Entity prefix; doubles as the device id.
    pub prefix: String,
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    /// Template name the loader resolves to a RegisterSpec list.
    pub template: String,
    /// Setup-flow answers (phases, mppt_count, battery settings, ...).
    #[serde(default)]
    pub dynamic_config: HashMap<String, ContextValue>,
}

fn default_slave_id() -> u8 {
    1
}

impl DeviceConfig {
    /// Evaluation context for this device instance.
    pub fn context(&self) -> DeviceContext {
        let mut context = DeviceContext::new(self.slave_id, &self.prefix, &self.template);
        for (key, value) in &self.dynamic_config {
            context.set(key.clone(), value.clone());
        }
        context
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AcquisitionConfig {
    pub hub: HubConfig,
    /// Legacy single-device shape; normalized away by `devices()`.
    #[serde(default)]
    pub device: Option<DeviceConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl AcquisitionConfig {
    /// Canonical device list: the multi-device array with the legacy
    /// single-device entry folded in. Everything downstream consumes this
    /// one shape.
    pub fn device_list(&self) -> Vec<DeviceConfig> {
        let mut all = Vec::new();
        if let Some(single) = &self.device {
            all.push(single.clone());
        }
        all.extend(self.devices.iter().cloned());
        all
    }

    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .set_default("hub.host", "127.0.0.1")?
            .set_default("hub.port", 502)?
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            .add_source(File::with_name(&format!("{config_dir}/{run_mode}")).required(false))
            // e.g. ACQ__HUB__HOST=192.168.1.50
            .add_source(Environment::with_prefix("ACQ").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
