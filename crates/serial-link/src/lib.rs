//! Sensor Board Serial Link
//!
//! Connects the host to the sensor board over a byte-stream transport.
//! Three workers run concurrently once the link is started:
//!
//! - RX moves every byte the transport delivers into the inbound buffer
//! - TX drains the outbound buffer to the transport in bounded chunks
//! - Decode turns inbound bytes into frames and publishes them on a
//!   [`frame_bus::FrameBus`]
//!
//! Worker errors never stop the link. They are counted, logged and
//! forwarded to an error channel the application may drain.

mod config;
mod error;
mod link;
mod mock;
mod report;
mod stats;
mod transport;
mod worker;

pub use self::config::LinkConfig;
pub use error::LinkError;
pub use link::SerialLink;
pub use mock::{MockHandle, MockTransport};
pub use stats::StatsSnapshot;
pub use transport::{SerialTransport, Transport};
