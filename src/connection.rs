//! One TCP connection to a gateway: framing, reader task, backoff reconnect.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::timeout,
};
use tracing::{info, warn};

use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const LINE_BUFFER_CAPACITY: usize = 1000;
const RECONNECT_TIME_START: f64 = 1.0;
const RECONNECT_TIME_BACKOFF: f64 = 2.0;
const RECONNECT_TIME_MAX: f64 = 30.0;
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

async fn dial(host: &str, port: u16) -> Result<TcpStream> {
    let addr = format!("{host}:{port}");
    let connect = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await;
    let stream = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(Error::DeviceUnavailable {
                host: host.to_string(),
                port,
                source: e,
            })
        }
        Err(_) => {
            return Err(Error::DeviceUnavailable {
                host: host.to_string(),
                port,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })
        }
    };
    stream.set_nodelay(true).ok();
    Ok(stream)
}

/// A single persistent (or transient) line-oriented connection to a gateway.
///
/// Owns the socket's write half behind a mutex shared with the background reader
/// task, so a successful reconnect can swap in a fresh write half transparently.
/// The reader task pushes framed lines into a bounded channel; callers pair their own
/// requests with responses by draining it with [`Connection::wait_for_line`].
pub struct Connection {
    host: String,
    port: u16,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    lines: Mutex<mpsc::Receiver<String>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
}

impl Connection {
    /// Dials `host:port` and spawns the reader task.
    pub async fn create(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let stream = dial(&host, port).await?;
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(Some(write_half)));
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(LINE_BUFFER_CAPACITY);
        let task = tokio::spawn(reader_loop(
            host.clone(),
            port,
            read_half,
            tx,
            writer.clone(),
            closed.clone(),
        ));
        Ok(Connection {
            host,
            port,
            writer,
            lines: Mutex::new(rx),
            reader_task: Mutex::new(Some(task)),
            closed,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Writes one line, appending the protocol's `\r` terminator.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed(format!("{}:{}", self.host, self.port)));
        }
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(Error::ConnectionClosed(format!("{}:{}", self.host, self.port)));
        };
        let mut framed = line.as_bytes().to_vec();
        framed.push(b'\r');
        if writer.write_all(&framed).await.is_err() {
            *guard = None;
            return Err(Error::ConnectionClosed(format!("{}:{}", self.host, self.port)));
        }
        Ok(())
    }

    /// Awaits the next framed line, or `Timeout` after `DEFAULT_WAIT_TIMEOUT`.
    pub async fn wait_for_line(&self) -> Result<String> {
        let mut lines = self.lines.lock().await;
        match timeout(DEFAULT_WAIT_TIMEOUT, lines.recv()).await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(Error::ConnectionClosed(format!("{}:{}", self.host, self.port))),
            Err(_) => Err(Error::Timeout(format!("{}:{}", self.host, self.port))),
        }
    }

    /// Drains and discards any lines currently buffered, without blocking.
    pub async fn clear_line_buffer(&self) {
        let mut lines = self.lines.lock().await;
        while lines.try_recv().is_ok() {}
    }

    /// Closes the connection: stops the writer and cancels the reader task.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        *self.writer.lock().await = None;
    }
}

async fn reader_loop(
    host: String,
    port: u16,
    mut read_half: OwnedReadHalf,
    tx: mpsc::Sender<String>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    closed: Arc<AtomicBool>,
) {
    let mut backoff = RECONNECT_TIME_START;
    loop {
        match read_line_cr(&mut read_half).await {
            Ok(Some(line)) => {
                // Read succeeded, reset retry backoff to initial value.
                backoff = RECONNECT_TIME_START;
                if line.is_empty() {
                    continue;
                }
                if tx.send(line).await.is_err() {
                    return;
                }
            }
            Ok(None) | Err(_) => {
                if closed.load(Ordering::Acquire) {
                    return;
                }
                warn!(host, port, "connection lost, reconnecting");
                let reconnected = reconnect_with_backoff(&host, port, backoff).await;
                // Progressively increase the retry delay up to the maximum, whether or
                // not this attempt succeeded.
                backoff = (backoff * RECONNECT_TIME_BACKOFF).min(RECONNECT_TIME_MAX);
                match reconnected {
                    Some((new_read, new_write)) => {
                        read_half = new_read;
                        *writer.lock().await = Some(new_write);
                    }
                    None => {
                        closed.store(true, Ordering::Release);
                        *writer.lock().await = None;
                        return;
                    }
                }
            }
        }
    }
}

async fn read_line_cr(read_half: &mut OwnedReadHalf) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = read_half.read(&mut byte).await?;
        if n == 0 {
            return Ok(None);
        }
        if byte[0] == b'\r' {
            break;
        }
        buf.push(byte[0]);
    }
    Ok(Some(String::from_utf8_lossy(&buf).trim().to_string()))
}

async fn reconnect_with_backoff(
    host: &str,
    port: u16,
    backoff: f64,
) -> Option<(OwnedReadHalf, OwnedWriteHalf)> {
    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
    match dial(host, port).await {
        Ok(stream) => {
            info!(host, port, "reconnected");
            Some(stream.into_split())
        }
        Err(_) => None,
    }
}
