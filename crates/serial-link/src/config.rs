//! Serial link configuration

use crate::error::LinkError;
use ::config::{Config, Environment, File};
use frame_protocol::wire::MAX_FRAME_LEN;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `SENSOR_LINK_BAUD_RATE=921600`
pub const ENV_PREFIX: &str = "SENSOR_LINK";

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial device path
    pub port: String,

    /// Line rate, 8N1 framing
    pub baud_rate: u32,

    /// Per-call read timeout of the serial port (milliseconds)
    pub read_timeout_ms: u64,

    /// Inbound byte buffer capacity
    pub rx_capacity: usize,

    /// Outbound byte buffer capacity
    pub tx_capacity: usize,

    /// Maximum bytes the TX worker hands to one transport write
    pub tx_chunk_size: usize,

    /// Sleep when a worker finds nothing to do (microseconds)
    pub idle_poll_us: u64,

    /// Sleep after an I/O failure before retrying (milliseconds)
    pub error_backoff_ms: u64,

    /// Per-worker join timeout on shutdown (milliseconds)
    pub shutdown_timeout_ms: u64,

    /// Pending error reports kept for the application
    pub error_channel_capacity: usize,

    /// Log filter used by the monitor binary
    pub log_level: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 1000,
            rx_capacity: ring_buffer::DEFAULT_CAPACITY,
            tx_capacity: ring_buffer::DEFAULT_CAPACITY,
            tx_chunk_size: 1024,
            idle_poll_us: 1000,
            error_backoff_ms: 100,
            shutdown_timeout_ms: 1000,
            error_channel_capacity: 256,
            log_level: "info".to_string(),
        }
    }
}

impl LinkConfig {
    /// Defaults for a given device and line rate
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Load configuration from defaults, an optional file, then environment
    ///
    /// Later sources override earlier ones. A file passed explicitly must
    /// exist; its format is picked from the extension.
    pub fn load(path: Option<&Path>) -> Result<Self, LinkError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let config: Self = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the workers cannot run with
    pub fn validate(&self) -> Result<(), LinkError> {
        let invalid = |msg: &str| Err(LinkError::InvalidConfig(msg.to_string()));

        if self.port.trim().is_empty() {
            return invalid("port must not be empty");
        }
        if self.baud_rate == 0 {
            return invalid("baud_rate must be positive");
        }
        if self.rx_capacity < MAX_FRAME_LEN {
            return Err(LinkError::InvalidConfig(format!(
                "rx_capacity must hold the longest frame ({MAX_FRAME_LEN} bytes), got {}",
                self.rx_capacity
            )));
        }
        if self.tx_capacity == 0 {
            return invalid("tx_capacity must be positive");
        }
        if self.tx_chunk_size == 0 {
            return invalid("tx_chunk_size must be positive");
        }
        if self.error_channel_capacity == 0 {
            return invalid("error_channel_capacity must be positive");
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_micros(self.idle_poll_us)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
