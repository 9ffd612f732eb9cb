//! Sensor Board Frame Protocol
//!
//! Wire format of the UART link between the host and the sensor board, the
//! decoded frame types, and the byte-driven decoder that recovers frames from
//! a chunked, possibly misaligned byte stream.

mod command;
mod decoder;
mod error;
mod frame;

pub use command::{CommandFrame, CommandType, ControlParams};
pub use decoder::{DecoderState, FrameDecoder};
pub use error::FrameError;
pub use frame::{ack_checksum, derive_current, AckFrame, ChannelData, DataFrame, Frame, CHANNEL_COUNT};

/// Wire format constants
pub mod wire {
    /// First lead byte of a data frame
    pub const DATA_LEAD1: u8 = 0xA9;
    /// Second lead byte of a data frame
    pub const DATA_LEAD2: u8 = 0xB5;
    /// Sentinel closing every data frame
    pub const DATA_TAIL: u8 = 0x33;
    /// Data frame bytes following the two lead bytes (tail included)
    pub const DATA_BODY_LEN: usize = 38;
    /// Full data frame length on the wire
    pub const DATA_FRAME_LEN: usize = DATA_BODY_LEN + 2;

    /// First lead byte of an ack frame
    pub const CMD_LEAD1: u8 = 0x05;
    /// Second lead byte of an ack frame
    pub const CMD_LEAD2: u8 = 0x1C;
    /// Ack frame bytes between the lead and the payload (command id, length)
    pub const ACK_HEADER_LEN: usize = 2;
    /// Longest ack payload the one-byte length field can describe
    pub const MAX_ACK_PAYLOAD: usize = u8::MAX as usize;
    /// Longest ack frame on the wire: lead, header, payload, checksum
    pub const MAX_ACK_FRAME_LEN: usize = 2 + ACK_HEADER_LEN + MAX_ACK_PAYLOAD + 1;
    /// Longest frame of either family; an inbound buffer smaller than this
    /// can stall the decoder on a partial frame forever
    pub const MAX_FRAME_LEN: usize = if MAX_ACK_FRAME_LEN > DATA_FRAME_LEN {
        MAX_ACK_FRAME_LEN
    } else {
        DATA_FRAME_LEN
    };

    /// Lead bytes of outbound host commands
    pub const COMMAND_LEAD: [u8; 2] = [0xA0, 0xB3];
}
