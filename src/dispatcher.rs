//! Registry of devices and the entry points external callers use.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::dataset::IrDataset;
use crate::error::{Error, Result};
use crate::port::{self, Device};
use crate::protocol::CommandTiming;
use crate::scheduler;
use crate::signal::SignalRecord;

fn split_host_port(spec: &str) -> (String, u16) {
    match spec.split_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(4998)),
        None => (spec.to_string(), 4998),
    }
}

/// Owns every registered [`Device`] plus the process-wide IR key database, and hands
/// out monotonically-cycling command ids for the hardware's continuous-repeat
/// semantics.
pub struct Dispatcher {
    devices: AsyncMutex<Vec<Arc<Device>>>,
    next_ir_id: AsyncMutex<u16>,
    pub dataset: IrDataset,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            devices: AsyncMutex::new(Vec::new()),
            next_ir_id: AsyncMutex::new(1),
            dataset: IrDataset::new(),
        }
    }

    async fn next_id(&self) -> u16 {
        let mut next = self.next_ir_id.lock().await;
        let id = *next;
        *next = (*next % 65535) + 1;
        id
    }

    pub async fn get_device(&self, host_spec: &str) -> Option<Arc<Device>> {
        let (host, port) = split_host_port(host_spec);
        self.devices
            .lock()
            .await
            .iter()
            .find(|d| d.host == host && d.port == port)
            .cloned()
    }

    /// Registers a new device. Populate/port-init failures are logged, not
    /// propagated — the (possibly empty) device is still registered, matching the
    /// reference dispatcher.
    pub async fn add_device(&self, host_spec: &str) -> Result<Arc<Device>> {
        if self.get_device(host_spec).await.is_some() {
            return Err(Error::DeviceAlreadyAdded(host_spec.to_string()));
        }
        let (host, tcp_port) = split_host_port(host_spec);
        let device = Arc::new(Device::new(host, tcp_port));
        port::populate_best_effort(&device).await;
        self.devices.lock().await.push(device.clone());
        Ok(device)
    }

    pub async fn clear_device_list(&self) {
        let mut devices = self.devices.lock().await;
        for device in devices.iter() {
            device.teardown().await;
        }
        devices.clear();
    }

    pub async fn dict_repr(&self) -> serde_json::Value {
        let devices = self.devices.lock().await;
        let mut out = Vec::with_capacity(devices.len());
        for d in devices.iter() {
            out.push(d.dict_repr().await);
        }
        serde_json::json!({ "devices": out })
    }

    pub async fn health(&self) -> serde_json::Value {
        let devices = self.devices.lock().await;
        let mut out = Vec::with_capacity(devices.len());
        for d in devices.iter() {
            out.push(d.health().await);
        }
        serde_json::json!({
            "devices": out,
            "irdb": self.dataset.health(),
        })
    }

    /// Sends `signal` to `ir_port_n` on `host_spec`. Exactly one of `repeats`/
    /// `duration_ms` may be set; both is `InvalidArguments`. Returns the timing of the
    /// last `sendir` issued, or `None` when the requested duration was too short for
    /// any command to be sent at all.
    pub async fn send_ir_signal(
        &self,
        host_spec: &str,
        ir_port_n: usize,
        signal: &SignalRecord,
        repeats: Option<u32>,
        duration_ms: Option<u32>,
    ) -> Result<Option<CommandTiming>> {
        if repeats.is_some() && duration_ms.is_some() {
            return Err(Error::InvalidArguments(
                "repeats and duration cannot both be provided",
            ));
        }
        let device = self
            .get_device(host_spec)
            .await
            .ok_or_else(|| Error::DeviceNotFound(host_spec.to_string()))?;
        let ir_port = device.get_ir_port(ir_port_n).await?;
        let version = device.version.lock().await.clone();
        let id = self.next_id().await;
        scheduler::send_ir_signal(
            &ir_port,
            device.policy.as_ref(),
            version.as_deref(),
            signal,
            repeats,
            duration_ms,
            id,
        )
        .await
    }

    /// Looks up `(keyset, key)` in the IR database and sends it; returns `false`
    /// without sending anything if the key is not found.
    pub async fn press_key(
        &self,
        host_spec: &str,
        ir_port_n: usize,
        keyset: &str,
        key: &str,
        repeats: Option<u32>,
        duration_ms: Option<u32>,
    ) -> Result<(bool, Option<CommandTiming>)> {
        let Some(signal) = self.dataset.get_signal_data(keyset, key) else {
            return Ok((false, None));
        };
        let timing = self
            .send_ir_signal(host_spec, ir_port_n, &signal, repeats, duration_ms)
            .await?;
        Ok((true, timing))
    }

    pub fn load_redrat_ir_dataset(&self, xml: &str) -> Result<()> {
        self.dataset.load_dataset(xml)
    }

    pub fn get_ir_dataset_json(&self) -> String {
        self.dataset.to_json_pretty()
    }
}
