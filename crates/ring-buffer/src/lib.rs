//! Bounded Ring Buffer
//!
//! Provides a fixed-capacity FIFO shared between a producer thread and a
//! consumer thread. Writes never block and never grow the storage: whatever
//! does not fit is dropped and the short count is returned to the caller.

mod buffer;
mod error;

pub use buffer::{BufferId, RingBuffer, DEFAULT_CAPACITY};
pub use error::RingBufferError;
