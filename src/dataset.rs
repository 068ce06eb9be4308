//! Process-wide IR key database: a replace-only snapshot of parsed RedRat signals.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::Result;
use crate::signal::{self, SignalRecord};

/// Holds every device's key set currently loaded, keyed by device name then key name.
#[derive(Default)]
pub struct IrDataset {
    devices: RwLock<HashMap<String, HashMap<String, SignalRecord>>>,
}

impl IrDataset {
    pub fn new() -> Self {
        IrDataset::default()
    }

    /// Parses `xml` and atomically replaces the entire dataset with its contents.
    pub fn load_dataset(&self, xml: &str) -> Result<()> {
        let parsed = signal::parse_redrat_xml(xml)?;
        let mut replacement = HashMap::new();
        for device in parsed {
            let keys = device
                .keys
                .into_iter()
                .map(|k| (k.name.clone(), k))
                .collect();
            replacement.insert(device.name, keys);
        }
        *self.devices.write().unwrap() = replacement;
        Ok(())
    }

    pub fn get_signal_data(&self, device_name: &str, key_name: &str) -> Option<SignalRecord> {
        self.devices
            .read()
            .unwrap()
            .get(device_name)?
            .get(key_name)
            .cloned()
    }

    pub fn health(&self) -> serde_json::Value {
        let devices = self.devices.read().unwrap();
        serde_json::json!({
            "dataset_loaded": !devices.is_empty(),
            "ir_devices": devices.keys().cloned().collect::<Vec<_>>(),
        })
    }

    /// Renders the dataset as indented JSON with `BaseSequence`/`RepeatSequence`
    /// arrays kept on a single line, matching the diagnostic export format.
    pub fn to_json_pretty(&self) -> String {
        let devices = self.devices.read().unwrap();
        let mut placeholders: Vec<(String, String)> = Vec::new();
        let mut next_id = 0usize;

        let mut reserve_inline = |values: &[u32]| -> String {
            let token = format!("@@{next_id}@@");
            next_id += 1;
            placeholders.push((token.clone(), serde_json::to_string(values).unwrap()));
            token
        };

        let mut device_list: Vec<serde_json::Value> = devices
            .iter()
            .map(|(name, keys)| {
                let key_list: Vec<serde_json::Value> = keys
                    .values()
                    .map(|k| {
                        let base_token = reserve_inline(&k.base_sequence);
                        let repeat_token = reserve_inline(&k.repeat_sequence);
                        serde_json::json!({
                            "Name": k.name,
                            "Frequency": k.frequency,
                            "BaseSequence": base_token,
                            "RepeatSequence": repeat_token,
                            "DefaultRepeats": k.default_repeats,
                            "BaseSequenceMicros": k.base_sequence_micros,
                            "RepeatSequenceMicros": k.repeat_sequence_micros,
                        })
                    })
                    .collect();
                serde_json::json!({ "DeviceName": name, "DeviceKeys": key_list })
            })
            .collect();
        device_list.sort_by(|a, b| a["DeviceName"].as_str().cmp(&b["DeviceName"].as_str()));

        let mut rendered = serde_json::to_string_pretty(&serde_json::Value::Array(device_list))
            .expect("dataset JSON is always serializable");
        for (token, actual) in placeholders {
            rendered = rendered.replace(&format!("\"{token}\""), &actual);
        }
        rendered
    }
}
