use std::io;

/// Errors produced anywhere in the dispatch core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("device {host}:{port} unavailable: {source}")]
    DeviceUnavailable {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("no device registered for {0}")]
    DeviceNotFound(String),

    #[error("device {0} already added")]
    DeviceAlreadyAdded(String),

    #[error("no IR port numbered {requested} (device has {available})")]
    PortNotFound { requested: usize, available: usize },

    #[error("connection to {0} is closed")]
    ConnectionClosed(String),

    #[error("gateway returned unexpected line: {0}")]
    ProtocolError(String),

    #[error("timed out waiting for a response from {0}")]
    Timeout(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(&'static str),

    #[error("failed to load IR dataset: {0}")]
    DatasetLoadError(String),

    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
