//! Ring Buffer Error Types

use thiserror::Error;

/// Errors raised at the ring buffer call boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingBufferError {
    /// A buffer must hold at least one element
    #[error("Ring buffer capacity must be at least 1")]
    ZeroCapacity,
}
