//! Frame Definitions and Body Decoding
//!
//! Defines the two frame families carried on the inbound byte stream and
//! the fixed layout of the data frame body.

use crate::error::FrameError;
use crate::wire::{CMD_LEAD1, CMD_LEAD2, DATA_BODY_LEN, DATA_LEAD1, DATA_LEAD2, DATA_TAIL};
use serde::Serialize;
use std::fmt;

/// Measurement channels per data frame
pub const CHANNEL_COUNT: usize = 4;

// Body offsets (after the two lead bytes)
const ADC_OFFSET: usize = 0;
const SDADC_OFFSET: usize = 8;
const ADJ0_OFFSET: usize = 24;
const ADJ1_OFFSET: usize = 28;
const MASTER_SEQ_OFFSET: usize = 32;
const SLAVE_SEQ_OFFSET: usize = 34;
const STATE_OFFSET: usize = 36;
const TAIL_OFFSET: usize = 37;

/// Raw ADC slot read by each channel
const ADC_SLOT: [usize; CHANNEL_COUNT] = [1, 0, 2, 3];

/// Raw SDADC slots (sub-sample 0, sub-sample 1) read by each channel.
/// The board samples in the order CH1A, CH2A, CH3A, CH1B, CH2B, CH4A, CH3B, CH4B.
const SDADC_SLOT: [(usize, usize); CHANNEL_COUNT] = [(0, 3), (1, 4), (2, 6), (5, 7)];

/// Compute channel current from the first SDADC sub-sample and its gain setting
///
/// `1000 * (sdadc0 + 32767) * 3300 / 65535 / ((256 - adj0) * 3.92)`
pub fn derive_current(sdadc0: i16, adj0: u8) -> f64 {
    1000.0 * (f64::from(sdadc0) + 32767.0) * 3300.0
        / 65535.0
        / ((256.0 - f64::from(adj0)) * 3.92)
}

/// Modulo-256 sum of the ack lead bytes, command id, length and payload
pub fn ack_checksum(cmd_id: u8, length: u8, payload: &[u8]) -> u8 {
    [CMD_LEAD1, CMD_LEAD2, cmd_id, length]
        .iter()
        .chain(payload)
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

fn le_i16(body: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([body[offset], body[offset + 1]])
}

fn le_u16(body: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([body[offset], body[offset + 1]])
}

/// One measurement channel of a data frame
///
/// The current is derived from the raw fields on construction and cannot be
/// set on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelData {
    adc: i16,
    sdadc0: i16,
    sdadc1: i16,
    adj0: u8,
    adj1: u8,
    current: f64,
}

impl ChannelData {
    /// Create a channel from raw readings
    pub fn new(adc: i16, sdadc0: i16, sdadc1: i16, adj0: u8, adj1: u8) -> Self {
        Self {
            adc,
            sdadc0,
            sdadc1,
            adj0,
            adj1,
            current: derive_current(sdadc0, adj0),
        }
    }

    pub fn adc(&self) -> i16 {
        self.adc
    }

    pub fn sdadc0(&self) -> i16 {
        self.sdadc0
    }

    pub fn sdadc1(&self) -> i16 {
        self.sdadc1
    }

    /// Gain setting applied to sub-sample 0
    pub fn adj0(&self) -> u8 {
        self.adj0
    }

    /// Gain setting applied to sub-sample 1
    pub fn adj1(&self) -> u8 {
        self.adj1
    }

    /// Derived channel current
    pub fn current(&self) -> f64 {
        self.current
    }
}

/// Periodic measurement frame (`A9 B5` + 38-byte body)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataFrame {
    /// Channel readings in channel order
    pub channels: [ChannelData; CHANNEL_COUNT],
    /// Master frame sequence
    pub master_seq: u16,
    /// Slave frame sequence (servo position index)
    pub slave_seq: u16,
    /// Device (lidar) state flag
    pub device_state: u8,
}

impl DataFrame {
    /// Decode a data frame body (the 38 bytes after the lead bytes)
    ///
    /// The tail sentinel is checked before any field is read.
    pub fn decode_body(body: &[u8]) -> Result<Self, FrameError> {
        if body.len() != DATA_BODY_LEN {
            return Err(FrameError::InvalidLength {
                expected: DATA_BODY_LEN,
                actual: body.len(),
            });
        }
        if body[TAIL_OFFSET] != DATA_TAIL {
            return Err(FrameError::BadTail {
                expected: DATA_TAIL,
                actual: body[TAIL_OFFSET],
            });
        }

        let channels = std::array::from_fn(|ch| {
            let (slot0, slot1) = SDADC_SLOT[ch];
            ChannelData::new(
                le_i16(body, ADC_OFFSET + 2 * ADC_SLOT[ch]),
                le_i16(body, SDADC_OFFSET + 2 * slot0),
                le_i16(body, SDADC_OFFSET + 2 * slot1),
                body[ADJ0_OFFSET + ch],
                body[ADJ1_OFFSET + ch],
            )
        });

        Ok(Self {
            channels,
            master_seq: le_u16(body, MASTER_SEQ_OFFSET),
            slave_seq: le_u16(body, SLAVE_SEQ_OFFSET),
            device_state: body[STATE_OFFSET],
        })
    }

    /// Encode the full 40-byte wire image, lead and tail included
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = [0u8; DATA_BODY_LEN];

        for (ch, channel) in self.channels.iter().enumerate() {
            let adc = ADC_OFFSET + 2 * ADC_SLOT[ch];
            body[adc..adc + 2].copy_from_slice(&channel.adc.to_le_bytes());

            let (slot0, slot1) = SDADC_SLOT[ch];
            let sdadc0 = SDADC_OFFSET + 2 * slot0;
            let sdadc1 = SDADC_OFFSET + 2 * slot1;
            body[sdadc0..sdadc0 + 2].copy_from_slice(&channel.sdadc0.to_le_bytes());
            body[sdadc1..sdadc1 + 2].copy_from_slice(&channel.sdadc1.to_le_bytes());

            body[ADJ0_OFFSET + ch] = channel.adj0;
            body[ADJ1_OFFSET + ch] = channel.adj1;
        }

        body[MASTER_SEQ_OFFSET..MASTER_SEQ_OFFSET + 2].copy_from_slice(&self.master_seq.to_le_bytes());
        body[SLAVE_SEQ_OFFSET..SLAVE_SEQ_OFFSET + 2].copy_from_slice(&self.slave_seq.to_le_bytes());
        body[STATE_OFFSET] = self.device_state;
        body[TAIL_OFFSET] = DATA_TAIL;

        let mut frame = Vec::with_capacity(DATA_BODY_LEN + 2);
        frame.extend_from_slice(&[DATA_LEAD1, DATA_LEAD2]);
        frame.extend_from_slice(&body);
        frame
    }
}

impl fmt::Display for DataFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "data master={:04X} slave={:04X} state={}",
            self.master_seq, self.slave_seq, self.device_state
        )?;
        for (ch, channel) in self.channels.iter().enumerate() {
            write!(
                f,
                " | ch{} adc={} sdadc={}/{} adj={}/{} current={:.3}",
                ch + 1,
                channel.adc,
                channel.sdadc0,
                channel.sdadc1,
                channel.adj0,
                channel.adj1,
                channel.current
            )?;
        }
        Ok(())
    }
}

/// Command acknowledgement frame (`05 1C` id len payload checksum)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AckFrame {
    cmd_id: u8,
    payload: Vec<u8>,
    checksum: u8,
}

impl AckFrame {
    /// Build an ack frame, computing its checksum
    pub fn new(cmd_id: u8, payload: Vec<u8>) -> Result<Self, FrameError> {
        let length = u8::try_from(payload.len())
            .map_err(|_| FrameError::PayloadTooLong(payload.len()))?;
        let checksum = ack_checksum(cmd_id, length, &payload);
        Ok(Self {
            cmd_id,
            payload,
            checksum,
        })
    }

    /// Validate the bytes following the header: `length` payload bytes then
    /// the checksum
    pub fn decode(cmd_id: u8, length: u8, body: &[u8]) -> Result<Self, FrameError> {
        let expected_len = usize::from(length) + 1;
        if body.len() != expected_len {
            return Err(FrameError::InvalidLength {
                expected: expected_len,
                actual: body.len(),
            });
        }

        let (payload, received) = body.split_at(usize::from(length));
        let expected = ack_checksum(cmd_id, length, payload);
        if expected != received[0] {
            return Err(FrameError::ChecksumError {
                expected,
                actual: received[0],
            });
        }

        Ok(Self {
            cmd_id,
            payload: payload.to_vec(),
            checksum: expected,
        })
    }

    pub fn cmd_id(&self) -> u8 {
        self.cmd_id
    }

    /// Payload length as carried in the length byte
    pub fn length(&self) -> u8 {
        // Bounded by construction
        self.payload.len() as u8
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Encode the full wire image
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.payload.len() + 5);
        frame.extend_from_slice(&[CMD_LEAD1, CMD_LEAD2, self.cmd_id, self.length()]);
        frame.extend_from_slice(&self.payload);
        frame.push(self.checksum);
        frame
    }
}

impl fmt::Display for AckFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ack cmd={:02X} len={} checksum={:02X} payload={:02X?}",
            self.cmd_id,
            self.length(),
            self.checksum,
            self.payload
        )
    }
}

/// A fully validated frame recovered from the byte stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Data(DataFrame),
    Ack(AckFrame),
}

impl Frame {
    /// Get the data frame, if this is one
    pub fn as_data(&self) -> Option<&DataFrame> {
        match self {
            Frame::Data(frame) => Some(frame),
            Frame::Ack(_) => None,
        }
    }

    /// Get the ack frame, if this is one
    pub fn as_ack(&self) -> Option<&AckFrame> {
        match self {
            Frame::Ack(frame) => Some(frame),
            Frame::Data(_) => None,
        }
    }

    /// Encode the frame back to its wire image
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Frame::Data(frame) => frame.to_bytes(),
            Frame::Ack(frame) => frame.to_bytes(),
        }
    }
}

impl From<DataFrame> for Frame {
    fn from(frame: DataFrame) -> Self {
        Frame::Data(frame)
    }
}

impl From<AckFrame> for Frame {
    fn from(frame: AckFrame) -> Self {
        Frame::Ack(frame)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Data(frame) => fmt::Display::fmt(frame, f),
            Frame::Ack(frame) => fmt::Display::fmt(frame, f),
        }
    }
}
