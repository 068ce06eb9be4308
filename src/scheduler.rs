//! Translates a repeat count or a wall-clock duration into one or a chain of
//! `sendir` invocations, bounded by the port's maximum repeat count.

use tokio::time::{sleep, Duration, Instant};

use crate::error::{Error, Result};
use crate::policy::MaxRepeatsPolicy;
use crate::port::IrPort;
use crate::protocol::{self, CommandTiming};
use crate::signal::SignalRecord;

/// `repeat == 0` fires one unrepeated shot; `0 < repeat <= max` fires one bounded
/// `sendir`; `repeat > max` falls through to the duration scheduler so the hardware
/// limit is respected via continuous-repeat chaining.
pub async fn send_repeats(
    port: &IrPort,
    policy: &dyn MaxRepeatsPolicy,
    version: Option<&str>,
    signal: &SignalRecord,
    repeat: u32,
    wait_for_response: bool,
    id: u16,
) -> Result<Option<CommandTiming>> {
    let max_repeats = policy.max_repeats(version);
    if repeat == 0 {
        return protocol::sendir(
            &port.connection,
            port.module,
            port.port,
            id,
            signal.frequency,
            1,
            1,
            &signal.base_sequence,
            wait_for_response,
        )
        .await
        .map(Some);
    }
    if repeat <= max_repeats {
        let offset = signal.base_sequence.len() + 1;
        let durations: Vec<u32> = signal
            .base_sequence
            .iter()
            .chain(signal.repeat_sequence.iter())
            .copied()
            .collect();
        return protocol::sendir(
            &port.connection,
            port.module,
            port.port,
            id,
            signal.frequency,
            repeat,
            offset,
            &durations,
            wait_for_response,
        )
        .await
        .map(Some);
    }
    let seconds = (signal.base_sequence_micros as f64
        + repeat as f64 * signal.repeat_sequence_micros as f64)
        / 1_000_000.0;
    Box::pin(send_duration(port, policy, version, signal, seconds, false, id)).await
}

/// Sends `signal` for approximately `seconds` of wall-clock time, chaining
/// continuous-repeat `sendir`s when the requested duration exceeds what a single
/// `sendir` can express within the port's max-repeat ceiling.
#[allow(clippy::too_many_arguments)]
pub async fn send_duration(
    port: &IrPort,
    policy: &dyn MaxRepeatsPolicy,
    version: Option<&str>,
    signal: &SignalRecord,
    seconds: f64,
    check_max_repeats: bool,
    id: u16,
) -> Result<Option<CommandTiming>> {
    let max_repeats = policy.max_repeats(version);
    let base_seconds = signal.base_sequence_micros as f64 / 1_000_000.0;
    let repeat_seconds = signal.repeat_sequence_micros as f64 / 1_000_000.0;
    let max_repeat_seconds = base_seconds + max_repeats as f64 * repeat_seconds;
    if max_repeat_seconds <= 0.5 {
        return Err(Error::InvalidArguments(
            "RepeatSequence too short to schedule a duration press",
        ));
    }

    let start = Instant::now();
    let mut deadline = start + Duration::from_secs_f64(seconds.max(0.0));

    // The -0.05 keeps a repeat from being added when only 5% into it.
    let repeat = (-0.05 + (seconds * 1_000_000.0 - signal.base_sequence_micros as f64)
        / signal.repeat_sequence_micros as f64)
        .ceil();
    if repeat < 0.0 {
        return Ok(None);
    }
    let repeat = repeat as u32;

    if check_max_repeats && repeat <= max_repeats {
        return Box::pin(send_repeats(
            port, policy, version, signal, repeat, true, id,
        ))
        .await;
    }

    // Empirically the hardware needs roughly two extra repeats' worth of duration to
    // land on time; 1.9x avoids overshooting the ceil() above already provides.
    deadline += Duration::from_secs_f64(1.9 * repeat_seconds);
    let max_chunk = Duration::from_secs_f64(max_repeat_seconds);

    loop {
        Box::pin(send_repeats(port, policy, version, signal, max_repeats, false, id)).await?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining <= max_chunk + max_chunk / 2 {
            let sleep_until = deadline.checked_sub(max_chunk).unwrap_or(deadline);
            if sleep_until > Instant::now() {
                tokio::time::sleep_until(sleep_until).await;
            }
            return Box::pin(send_repeats(port, policy, version, signal, max_repeats, true, id)).await;
        }
        sleep(max_chunk / 4).await;
    }
}

/// Entry point mirroring the dispatcher's `send_ir_signal`: exactly one of
/// `repeats`/`duration_ms` may be set. Acquires `port.lock` for the whole call so no
/// other command can interleave on the wire.
pub async fn send_ir_signal(
    port: &IrPort,
    policy: &dyn MaxRepeatsPolicy,
    version: Option<&str>,
    signal: &SignalRecord,
    repeats: Option<u32>,
    duration_ms: Option<u32>,
    id: u16,
) -> Result<Option<CommandTiming>> {
    if repeats.is_some() && duration_ms.is_some() {
        return Err(Error::InvalidArguments(
            "repeats and duration cannot both be provided",
        ));
    }
    let _guard = port.lock.lock().await;
    match (repeats, duration_ms) {
        (None, None) => {
            send_repeats(port, policy, version, signal, signal.default_repeats, true, id).await
        }
        (Some(r), None) => send_repeats(port, policy, version, signal, r, true, id).await,
        (None, Some(ms)) => {
            send_duration(port, policy, version, signal, ms as f64 / 1000.0, true, id).await
        }
        (Some(_), Some(_)) => unreachable!("checked above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::policy::DefaultPolicy;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as AsyncMutex;

    fn test_signal() -> SignalRecord {
        SignalRecord::new("Power", 38000, vec![100, 100, 100, 10], vec![50, 50, 50, 10], Some(1))
    }

    async fn fake_port(responder: impl FnOnce(tokio::net::TcpStream) + Send + 'static) -> IrPort {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            responder(socket);
        });
        let connection = Connection::create(addr.ip().to_string(), addr.port())
            .await
            .unwrap();
        IrPort {
            module: 1,
            port: 1,
            connection,
            lock: AsyncMutex::new(()),
        }
    }

    #[tokio::test]
    async fn zero_repeats_sends_one_shot() {
        let port = fake_port(|mut socket| {
            tokio::spawn(async move {
                let mut buf = [0u8; 256];
                let n = socket.read(&mut buf).await.unwrap();
                let cmd = String::from_utf8_lossy(&buf[..n]);
                assert!(cmd.starts_with("sendir,1:1,1,38000,1,1,"));
                socket.write_all(b"completeir,1:1,1\r").await.unwrap();
            });
        })
        .await;
        let signal = test_signal();
        let timing = send_repeats(&port, &DefaultPolicy, None, &signal, 0, true, 1)
            .await
            .unwrap();
        assert!(timing.is_some());
    }

    #[tokio::test]
    async fn bounded_repeats_sends_full_sequence_with_offset() {
        let port = fake_port(|mut socket| {
            tokio::spawn(async move {
                let mut buf = [0u8; 256];
                let n = socket.read(&mut buf).await.unwrap();
                let cmd = String::from_utf8_lossy(&buf[..n]);
                assert!(cmd.starts_with("sendir,1:1,2,38000,10,5,"));
                socket.write_all(b"completeir,1:1,2\r").await.unwrap();
            });
        })
        .await;
        let signal = test_signal();
        let timing = send_repeats(&port, &DefaultPolicy, None, &signal, 10, true, 2)
            .await
            .unwrap();
        assert!(timing.is_some());
    }

    #[tokio::test]
    async fn invalid_arguments_when_both_set() {
        let port = fake_port(|_socket| {}).await;
        let signal = test_signal();
        let err = send_ir_signal(&port, &DefaultPolicy, None, &signal, Some(1), Some(100), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)));
    }
}
