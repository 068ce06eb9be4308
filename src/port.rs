//! Device inventory and per-port connection ownership.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::policy::{DefaultPolicy, MaxRepeatsPolicy};
use crate::protocol::{self, ModuleDescriptor, ModuleType};

/// One IR emitter port, with its own persistent connection and a mutex that
/// serializes every `sendir`/`stopir` issued on it.
pub struct IrPort {
    pub module: u32,
    pub port: u32,
    pub connection: Connection,
    pub lock: AsyncMutex<()>,
}

/// A single Global Caché gateway: its module inventory and, for every IR module, one
/// connection per port.
pub struct Device {
    pub host: String,
    pub port: u16,
    pub version: AsyncMutex<Option<String>>,
    pub modules: AsyncMutex<Vec<ModuleDescriptor>>,
    /// IR ports in `(module, port)` ascending order; index 0 is logical port 1.
    pub ir_ports: AsyncMutex<Vec<Arc<IrPort>>>,
    pub policy: Box<dyn MaxRepeatsPolicy>,
}

impl Device {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Device {
            host: host.into(),
            port,
            version: AsyncMutex::new(None),
            modules: AsyncMutex::new(Vec::new()),
            ir_ports: AsyncMutex::new(Vec::new()),
            policy: Box::new(DefaultPolicy),
        }
    }

    /// Opens a transient connection, reads `getversion` + `getdevices`, and records
    /// both on the device. Does not open per-port connections; call
    /// [`Device::init_ir_device`] for that.
    pub async fn populate_info(&self) -> Result<()> {
        let conn = Connection::create(self.host.clone(), self.port).await?;
        // Give the reader task a moment to start pumping before the first request.
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        let version = protocol::get_version(&conn).await?;
        let modules = protocol::get_devices(&conn).await?;
        conn.close().await;
        *self.version.lock().await = Some(version);
        *self.modules.lock().await = modules;
        Ok(())
    }

    /// Opens one persistent connection per port on every IR module, in
    /// `(module, port)` ascending order.
    pub async fn init_ir_device(&self) -> Result<()> {
        let modules = self.modules.lock().await.clone();
        let mut ports = Vec::new();
        for descriptor in modules.iter().filter(|m| m.kind == ModuleType::Ir) {
            for port_n in 1..=descriptor.ports {
                let connection = Connection::create(self.host.clone(), self.port).await?;
                ports.push(Arc::new(IrPort {
                    module: descriptor.module,
                    port: port_n,
                    connection,
                    lock: AsyncMutex::new(()),
                }));
            }
        }
        *self.ir_ports.lock().await = ports;
        Ok(())
    }

    /// 1-indexed lookup across all IR ports in ascending `(module, port)` order.
    pub async fn get_ir_port(&self, n: usize) -> Result<Arc<IrPort>> {
        let ports = self.ir_ports.lock().await;
        if n == 0 || n > ports.len() {
            return Err(Error::PortNotFound {
                requested: n,
                available: ports.len(),
            });
        }
        Ok(ports[n - 1].clone())
    }

    pub async fn teardown(&self) {
        for port in self.ir_ports.lock().await.iter() {
            port.connection.close().await;
        }
    }

    /// Refreshes `version`/`modules` via a fresh transient connection (the same work
    /// [`Device::populate_info`] does), without disturbing the device's persistent IR
    /// port connections, and reports the result alongside the refreshed inventory.
    pub async fn health(&self) -> serde_json::Value {
        let (available, errors) = match self.populate_info().await {
            Ok(()) => (true, Vec::<String>::new()),
            Err(e) => (false, vec![e.to_string()]),
        };
        let mut result = self.dict_repr().await;
        if let serde_json::Value::Object(map) = &mut result {
            map.insert("available".to_string(), serde_json::json!(available));
            map.insert("errors".to_string(), serde_json::json!(errors));
        }
        result
    }

    pub async fn dict_repr(&self) -> serde_json::Value {
        let modules = self.modules.lock().await.clone();
        let ir_port_count = self.ir_ports.lock().await.len();
        serde_json::json!({
            "host": self.host,
            "port": self.port,
            "version": *self.version.lock().await,
            "modules": modules.iter().map(|m| serde_json::json!({
                "module": m.module,
                "ports": m.ports,
                "type": match m.kind { ModuleType::Ir => "IR", ModuleType::Ethernet => "ETHERNET" },
            })).collect::<Vec<_>>(),
            "ir_ports": ir_port_count,
        })
    }
}

/// Best-effort populate + port init; failures are logged, not propagated, matching
/// the reference dispatcher which still registers a partially-initialized device.
pub async fn populate_best_effort(device: &Device) {
    if let Err(e) = device.populate_info().await {
        warn!(host = %device.host, port = device.port, error = %e, "populate_info failed");
        return;
    }
    if let Err(e) = device.init_ir_device().await {
        warn!(host = %device.host, port = device.port, error = %e, "init_ir_device failed");
    }
}
