//! Wire encoding/decoding for the four commands this core speaks.

use std::time::SystemTime;

use crate::connection::Connection;
use crate::error::{Error, Result};

/// Request/response timestamps for one `sendir`, mirroring the
/// `HW-Command-Request-Time`/`HW-Command-Response-Time`/`HW-Command-Duration-Ms`
/// side-channel the reference dispatcher attaches to its HTTP context.
#[derive(Debug, Clone, Copy)]
pub struct CommandTiming {
    pub request_time: SystemTime,
    pub response_time: SystemTime,
    pub duration_ms: u64,
}

impl CommandTiming {
    fn measure(request_time: SystemTime) -> CommandTiming {
        let response_time = SystemTime::now();
        let elapsed = response_time.duration_since(request_time).unwrap_or_default();
        let duration_ms = (elapsed.as_secs_f64() * 1000.0).ceil() as u64;
        CommandTiming { request_time, response_time, duration_ms }
    }
}

/// One IR module exposed by `getdevices`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    Ir,
    Ethernet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub module: u32,
    pub ports: u32,
    pub kind: ModuleType,
}

/// `getversion` -> the raw version string.
pub async fn get_version(conn: &Connection) -> Result<String> {
    conn.clear_line_buffer().await;
    conn.write_line("getversion").await?;
    let line = conn.wait_for_line().await?;
    if line.starts_with("ERR") || line.starts_with("unknown") {
        return Err(Error::ProtocolError(line));
    }
    Ok(line)
}

/// `getdevices` -> the module inventory, in the order the gateway reports it.
pub async fn get_devices(conn: &Connection) -> Result<Vec<ModuleDescriptor>> {
    conn.clear_line_buffer().await;
    conn.write_line("getdevices").await?;
    let mut modules = Vec::new();
    loop {
        let line = conn.wait_for_line().await?;
        if line == "endlistdevices" {
            break;
        }
        modules.push(parse_device_line(&line)?);
    }
    Ok(modules)
}

fn parse_device_line(line: &str) -> Result<ModuleDescriptor> {
    let normalized = line.replace(',', " ");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let [tag, module, ports, kind] = tokens[..] else {
        return Err(Error::ProtocolError(line.to_string()));
    };
    if tag != "device" {
        return Err(Error::ProtocolError(line.to_string()));
    }
    let module = module
        .parse()
        .map_err(|_| Error::ProtocolError(line.to_string()))?;
    let ports = ports
        .parse()
        .map_err(|_| Error::ProtocolError(line.to_string()))?;
    let kind = match kind {
        "IR" => ModuleType::Ir,
        "ETHERNET" => ModuleType::Ethernet,
        _ => return Err(Error::ProtocolError(line.to_string())),
    };
    Ok(ModuleDescriptor { module, ports, kind })
}

/// `sendir,<module>:<port>,<id>,<freq>,<repeat>,<offset>,<durations...>`
///
/// When `wait_for_response` is false the call returns as soon as the line is written;
/// the eventual `completeir` is left for a later `clear_line_buffer`.
#[allow(clippy::too_many_arguments)]
pub async fn sendir(
    conn: &Connection,
    module: u32,
    port: u32,
    id: u16,
    freq: u32,
    repeat: u32,
    offset: usize,
    durations: &[u32],
    wait_for_response: bool,
) -> Result<CommandTiming> {
    let mut command = format!("sendir,{module}:{port},{id},{freq},{repeat},{offset}");
    for d in durations {
        command.push(',');
        command.push_str(&d.to_string());
    }
    let request_time = SystemTime::now();
    conn.clear_line_buffer().await;
    conn.write_line(&command).await?;
    if !wait_for_response {
        return Ok(CommandTiming::measure(request_time));
    }
    let line = conn.wait_for_line().await?;
    let expected_prefix = format!("completeir,{module}:{port},{id}");
    if line.starts_with("ERR") || line.starts_with("unknown") {
        return Err(Error::ProtocolError(line));
    }
    if line != expected_prefix {
        return Err(Error::ProtocolError(line));
    }
    Ok(CommandTiming::measure(request_time))
}

/// `stopir,<module>:<port>`
pub async fn stopir(conn: &Connection, module: u32, port: u32) -> Result<()> {
    let command = format!("stopir,{module}:{port}");
    conn.clear_line_buffer().await;
    conn.write_line(&command).await?;
    let line = conn.wait_for_line().await?;
    let expected_prefix = format!("stopir,{module}:{port}");
    if line.starts_with("ERR") || line.starts_with("unknown") {
        return Err(Error::ProtocolError(line));
    }
    if !line.starts_with(&expected_prefix) {
        return Err(Error::ProtocolError(line));
    }
    Ok(())
}
