//! Error types for the AUNetSend receiver

use std::time::Duration;
use thiserror::Error;

/// Main error type for the receiver
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Device write failed: {0}")]
    DeviceError(String),
}

/// Network and protocol errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Sync marker not found within {0:?}")]
    SyncTimeout(Duration),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed by peer")]
    Closed,

    #[error("Service discovery failed: {0}")]
    Discovery(String),

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Hand-off queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Buffer overrun ({depth} chunks queued)")]
    Overrun { depth: usize },

    #[error("Queue closed")]
    Closed,
}

/// Result type alias for the receiver
pub type Result<T> = std::result::Result<T, Error>;
