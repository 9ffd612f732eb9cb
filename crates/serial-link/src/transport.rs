//! Byte-stream transports

use crate::config::LinkConfig;
use crate::error::LinkError;
use std::io::{Read, Write};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::info;

/// A bidirectional byte stream to the sensor board
///
/// Implementations must not block longer than their read timeout, since
/// the RX worker holds the transport lock while reading.
pub trait Transport: Send {
    /// Read whatever is currently waiting; an empty vector means idle
    fn read_available(&mut self) -> Result<Vec<u8>, LinkError>;

    /// Write all bytes and flush
    fn write(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Number of bytes waiting to be read
    fn bytes_waiting(&mut self) -> Result<usize, LinkError>;

    fn is_open(&self) -> bool;

    /// Release the underlying device; idempotent
    fn close(&mut self);
}

/// Serial port transport, 8N1 without flow control
pub struct SerialTransport {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open the configured device
    pub fn open(config: &LinkConfig) -> Result<Self, LinkError> {
        info!(port = %config.port, baud = config.baud_rate, "Opening serial port");

        let port = tokio_serial::new(config.port.as_str(), config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.read_timeout())
            .open()?;

        Ok(Self {
            name: config.port.clone(),
            port: Some(port),
        })
    }

    /// Device path this transport was opened on
    pub fn name(&self) -> &str {
        &self.name
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, LinkError> {
        self.port.as_mut().ok_or(LinkError::TransportClosed)
    }
}

impl Transport for SerialTransport {
    fn read_available(&mut self) -> Result<Vec<u8>, LinkError> {
        let waiting = self.bytes_waiting()?;
        if waiting == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; waiting];
        let n = self
            .port()?
            .read(&mut buf)
            .map_err(|e| LinkError::ReadFailed(e.to_string()))?;
        buf.truncate(n);
        Ok(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let port = self.port()?;
        port.write_all(data)
            .and_then(|()| port.flush())
            .map_err(|e| LinkError::WriteFailed(e.to_string()))
    }

    fn bytes_waiting(&mut self) -> Result<usize, LinkError> {
        let waiting = self
            .port()?
            .bytes_to_read()
            .map_err(|e| LinkError::ReadFailed(e.to_string()))?;
        Ok(waiting as usize)
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!(port = %self.name, "Serial port closed");
        }
    }
}
