//! End-to-end scenarios against a loopback TCP gateway double.

use globalcache::{Dispatcher, SignalRecord};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Speaks just enough of the wire protocol to stand in for a real gateway:
/// `getversion` -> a fixed version string, `getdevices` -> one IR module with
/// `ports` ports, and every `sendir`/`stopir` is acknowledged unconditionally.
async fn spawn_fake_gateway(ports: u32) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve_connection(socket, ports));
        }
    });
    addr
}

async fn serve_connection(mut socket: TcpStream, ports: u32) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        while let Some(pos) = buf.iter().position(|&b| b == b'\r') {
            let line = String::from_utf8_lossy(&buf[..pos]).to_string();
            buf.drain(..=pos);
            if let Some(reply) = handle_line(&line, ports) {
                if socket.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn handle_line(line: &str, ports: u32) -> Option<String> {
    if line == "getversion" {
        return Some("710-1001-15\r".to_string());
    }
    if line == "getdevices" {
        return Some(format!("device,0,0 ETHERNET\rdevice,1,{ports} IR\rendlistdevices\r"));
    }
    if let Some(rest) = line.strip_prefix("sendir,") {
        let module_port = rest.split(',').next().unwrap_or("");
        let id = rest.split(',').nth(1).unwrap_or("");
        return Some(format!("completeir,{module_port},{id}\r"));
    }
    if let Some(rest) = line.strip_prefix("stopir,") {
        return Some(format!("stopir,{rest}\r"));
    }
    None
}

fn test_signal() -> SignalRecord {
    SignalRecord::new(
        "Power",
        38000,
        vec![100, 100, 100, 100, 10],
        vec![50, 50, 10],
        Some(1),
    )
}

#[tokio::test]
async fn add_device_discovers_ir_ports() {
    let addr = spawn_fake_gateway(3).await;
    let host = format!("{}:{}", addr.ip(), addr.port());
    let dispatcher = Dispatcher::new();
    let device = dispatcher.add_device(&host).await.unwrap();
    assert_eq!(device.get_ir_port(1).await.unwrap().port, 1);
    assert_eq!(device.get_ir_port(3).await.unwrap().port, 3);
    assert!(device.get_ir_port(4).await.is_err());
}

#[tokio::test]
async fn send_ir_signal_single_shot() {
    let addr = spawn_fake_gateway(1).await;
    let host = format!("{}:{}", addr.ip(), addr.port());
    let dispatcher = Dispatcher::new();
    dispatcher.add_device(&host).await.unwrap();
    let signal = test_signal();
    let timing = dispatcher
        .send_ir_signal(&host, 1, &signal, Some(0), None)
        .await
        .unwrap();
    assert!(timing.is_some());
}

#[tokio::test]
async fn send_ir_signal_bounded_repeats() {
    let addr = spawn_fake_gateway(1).await;
    let host = format!("{}:{}", addr.ip(), addr.port());
    let dispatcher = Dispatcher::new();
    dispatcher.add_device(&host).await.unwrap();
    let signal = test_signal();
    let timing = dispatcher
        .send_ir_signal(&host, 1, &signal, Some(10), None)
        .await
        .unwrap();
    assert!(timing.is_some());
}

#[tokio::test]
async fn press_key_uses_loaded_dataset() {
    let addr = spawn_fake_gateway(1).await;
    let host = format!("{}:{}", addr.ip(), addr.port());
    let dispatcher = Dispatcher::new();
    dispatcher.add_device(&host).await.unwrap();

    let sig_data = base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        [0u8, 1, 0x7f, 1, 0],
    );
    let xml = format!(
        r#"<AVDeviceDB><AVDevices><AVDevice>
            <DeviceName>Living Room TV</DeviceName>
            <Signals>
                <IRPacket xsi:type="ModulatedSignal">
                    <Name>VolumeUp</Name>
                    <ModulationFreq>38000</ModulationFreq>
                    <NoRepeats>1</NoRepeats>
                    <IntraSigPause>20</IntraSigPause>
                    <SigData>{sig_data}</SigData>
                    <Lengths>
                        <double>1.0</double>
                        <double>2.0</double>
                    </Lengths>
                </IRPacket>
            </Signals>
        </AVDevice></AVDevices></AVDeviceDB>"#
    );
    dispatcher.load_redrat_ir_dataset(&xml).unwrap();

    let (pressed, timing) = dispatcher
        .press_key(&host, 1, "Living Room TV", "VolumeUp", None, None)
        .await
        .unwrap();
    assert!(pressed);
    assert!(timing.is_some());

    let (missed, timing) = dispatcher
        .press_key(&host, 1, "Living Room TV", "Nonexistent", None, None)
        .await
        .unwrap();
    assert!(!missed);
    assert!(timing.is_none());
}

#[tokio::test]
async fn press_key_on_unknown_device_is_device_not_found() {
    let dispatcher = Dispatcher::new();
    let signal = test_signal();
    let err = dispatcher
        .send_ir_signal("10.255.255.1:4998", 1, &signal, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, globalcache::Error::DeviceNotFound(_)));
}

#[tokio::test]
async fn duplicate_add_device_is_rejected() {
    let addr = spawn_fake_gateway(1).await;
    let host = format!("{}:{}", addr.ip(), addr.port());
    let dispatcher = Dispatcher::new();
    dispatcher.add_device(&host).await.unwrap();
    let err = dispatcher.add_device(&host).await.unwrap_err();
    assert!(matches!(err, globalcache::Error::DeviceAlreadyAdded(_)));
}

#[tokio::test]
async fn health_reports_dataset_and_device_state() {
    let addr = spawn_fake_gateway(1).await;
    let host = format!("{}:{}", addr.ip(), addr.port());
    let dispatcher = Dispatcher::new();
    dispatcher.add_device(&host).await.unwrap();
    let health = dispatcher.health().await;
    assert_eq!(health["irdb"]["dataset_loaded"], false);
    assert_eq!(health["devices"][0]["available"], true);
}
