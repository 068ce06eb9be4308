//! Device-list configuration loading, independent of whatever front-end supplies it.

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Itach,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Itach
    }
}

fn default_count() -> u32 {
    1
}

/// One entry of the device-list YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceListEntry {
    pub host: String,
    pub port: Option<u16>,
    #[serde(rename = "type", default)]
    pub device_type: DeviceType,
    #[serde(default = "default_count")]
    pub count: u32,
}

/// Parses the device-list YAML, rejecting any entry naming hardware this core can't
/// drive (only one-connection-per-IR-port iTach-family gateways are supported).
pub fn parse_device_list(yaml: &str) -> Result<Vec<DeviceListEntry>> {
    let entries: Vec<DeviceListEntry> =
        serde_yaml::from_str(yaml).map_err(|e| Error::ConfigError(e.to_string()))?;
    for entry in &entries {
        if entry.count != 1 {
            return Err(Error::ConfigError(format!(
                "device {}: count must be 1, got {}",
                entry.host, entry.count
            )));
        }
    }
    Ok(entries)
}
