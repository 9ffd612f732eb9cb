//! Frame Error Types

use thiserror::Error;

/// Structural problems found while validating or building a frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Data frame did not end with the tail sentinel
    #[error("Frame tail mismatch: expected {expected:02X}, got {actual:02X}")]
    BadTail { expected: u8, actual: u8 },

    /// Ack frame checksum mismatch
    #[error("Checksum mismatch: expected {expected:02X}, got {actual:02X}")]
    ChecksumError { expected: u8, actual: u8 },

    /// Frame or field has the wrong number of bytes
    #[error("Invalid frame length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Lead bytes do not match the frame family
    #[error("Invalid frame header: {0:02X} {1:02X}")]
    InvalidHeader(u8, u8),

    /// Command type byte is not a known command
    #[error("Unknown command type {0:02X}")]
    UnknownCommand(u8),

    /// Payload does not fit the one-byte length field
    #[error("Payload of {0} bytes exceeds the 255-byte frame limit")]
    PayloadTooLong(usize),
}
