//! Frame Publish/Subscribe Bus
//!
//! Delivers every decoded frame into each registered subscriber buffer.

mod bus;

pub use bus::{FrameBuffer, FrameBus};
