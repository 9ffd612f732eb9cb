//! Serial Link Error Types

use frame_protocol::FrameError;
use ring_buffer::RingBufferError;
use thiserror::Error;

/// Errors surfaced by the serial link and its workers
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Transport read failed: {0}")]
    ReadFailed(String),

    #[error("Transport write failed: {0}")]
    WriteFailed(String),

    #[error("Transport is closed")]
    TransportClosed,

    #[error("Link is not running")]
    NotRunning,

    #[error("Outbound buffer full: need {needed} bytes, {free} free")]
    OutboundFull { needed: usize, free: usize },

    #[error("Framing error: {0}")]
    Framing(#[from] FrameError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] RingBufferError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("{worker} worker did not stop within {timeout_ms}ms")]
    ShutdownTimeout { worker: &'static str, timeout_ms: u64 },

    #[error("{worker} worker panicked: {reason}")]
    WorkerPanicked { worker: &'static str, reason: String },
}

impl LinkError {
    /// True for errors produced by the frame decoder
    pub fn is_framing(&self) -> bool {
        matches!(self, LinkError::Framing(_))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::SerialError(err.to_string())
    }
}

impl From<tokio_serial::Error> for LinkError {
    fn from(err: tokio_serial::Error) -> Self {
        LinkError::SerialError(err.to_string())
    }
}

impl From<::config::ConfigError> for LinkError {
    fn from(err: ::config::ConfigError) -> Self {
        LinkError::InvalidConfig(err.to_string())
    }
}
