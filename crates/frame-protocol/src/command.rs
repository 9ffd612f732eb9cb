//! Outbound Command Definitions
//!
//! Host-to-board commands: `A0 B3` + command type + command data. Multi-byte
//! fields are big-endian.

use crate::error::FrameError;
use crate::wire::COMMAND_LEAD;
use serde::{Deserialize, Serialize};

/// Command types understood by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandType {
    /// Read back the control block
    ReadStatus = 0x01,
    /// Overwrite the whole control block
    BatchWrite = 0x02,
    /// Set the data frame upload interval
    SetUploadInterval = 0x03,
    /// Set the automatic gain adjust interval
    SetAdjustInterval = 0x04,
    /// Set the single servo move time
    SetServoTime = 0x05,
    /// Set servo position low/high/divisor/setpoint
    SetServoPosition = 0x06,
    /// Set work mode flags
    SetWorkMode = 0x07,
    /// Set lidar switch-on delay
    SetLidarDelay = 0x08,
    /// Debug: read a gain register over I2C
    DebugI2cRead = 0x11,
    /// Debug: write a gain register over I2C
    DebugI2cWrite = 0x12,
    /// Debug: ping a servo
    DebugServoPing = 0x13,
    /// Debug: move a servo to an angle
    DebugSetServoAngle = 0x14,
    /// Debug: read a servo angle
    DebugReadServoAngle = 0x15,
    /// Debug: read a servo data register
    DebugReadServoData = 0x16,
    /// Debug: monitor a servo data register
    DebugMonitorServoData = 0x17,
    /// Enter debug mode with parameters
    StartDebugMode = 0x21,
    /// Enter continuous mode with parameters
    StartCMode = 0x22,
    /// Enter discrete mode
    StartDMode = 0x23,
}

impl CommandType {
    /// Get the command type byte
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Parse a command type byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        let command = match byte {
            0x01 => CommandType::ReadStatus,
            0x02 => CommandType::BatchWrite,
            0x03 => CommandType::SetUploadInterval,
            0x04 => CommandType::SetAdjustInterval,
            0x05 => CommandType::SetServoTime,
            0x06 => CommandType::SetServoPosition,
            0x07 => CommandType::SetWorkMode,
            0x08 => CommandType::SetLidarDelay,
            0x11 => CommandType::DebugI2cRead,
            0x12 => CommandType::DebugI2cWrite,
            0x13 => CommandType::DebugServoPing,
            0x14 => CommandType::DebugSetServoAngle,
            0x15 => CommandType::DebugReadServoAngle,
            0x16 => CommandType::DebugReadServoData,
            0x17 => CommandType::DebugMonitorServoData,
            0x21 => CommandType::StartDebugMode,
            0x22 => CommandType::StartCMode,
            0x23 => CommandType::StartDMode,
            _ => return None,
        };
        Some(command)
    }

    /// Check if this is a debug sub-command
    pub fn is_debug(&self) -> bool {
        (0x11..=0x17).contains(&self.as_byte())
    }
}

/// Board control block, written in one go by [`CommandType::BatchWrite`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlParams {
    /// Data frame upload interval
    pub upload_interval: u16,
    /// Automatic gain adjust interval
    pub adjust_interval: u16,
    /// Single servo move time (ms)
    pub servo_move_time: u16,
    /// Servo position lower bound
    pub pos_low: u16,
    /// Servo position upper bound
    pub pos_high: u16,
    /// Servo position step divisor
    pub pos_div: u16,
    /// Servo position setpoint
    pub pos_set: u16,
    /// Work mode flags
    pub work_mode_flags: u16,
    /// Lidar switch-on delay (ms)
    pub lidar_delay: u16,
}

impl ControlParams {
    /// Encoded size of the control block
    pub const ENCODED_LEN: usize = 18;

    fn fields(&self) -> [u16; 9] {
        [
            self.upload_interval,
            self.adjust_interval,
            self.servo_move_time,
            self.pos_low,
            self.pos_high,
            self.pos_div,
            self.pos_set,
            self.work_mode_flags,
            self.lidar_delay,
        ]
    }

    /// Pack the nine fields big-endian, in declaration order
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut bytes = [0u8; Self::ENCODED_LEN];
        for (chunk, value) in bytes.chunks_exact_mut(2).zip(self.fields()) {
            chunk.copy_from_slice(&value.to_be_bytes());
        }
        bytes
    }

    /// Unpack an 18-byte control block
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(FrameError::InvalidLength {
                expected: Self::ENCODED_LEN,
                actual: bytes.len(),
            });
        }

        let mut words = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
        let mut next = || words.next().unwrap_or_default();

        Ok(Self {
            upload_interval: next(),
            adjust_interval: next(),
            servo_move_time: next(),
            pos_low: next(),
            pos_high: next(),
            pos_div: next(),
            pos_set: next(),
            work_mode_flags: next(),
            lidar_delay: next(),
        })
    }
}

impl Default for ControlParams {
    /// Board power-on values
    fn default() -> Self {
        Self {
            upload_interval: 1,
            adjust_interval: 10,
            servo_move_time: 1000,
            pos_low: 0,
            pos_high: 1000,
            pos_div: 10,
            pos_set: 500,
            work_mode_flags: 0,
            lidar_delay: 10,
        }
    }
}

fn be_words(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_be_bytes()).collect()
}

/// Host-to-board command frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub command_type: CommandType,
    pub data: Vec<u8>,
}

impl CommandFrame {
    /// Create a command frame with raw data
    pub fn new(command_type: CommandType, data: Vec<u8>) -> Self {
        Self { command_type, data }
    }

    /// Encode the wire image: lead, command type, data
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.data.len() + 3);
        frame.extend_from_slice(&COMMAND_LEAD);
        frame.push(self.command_type.as_byte());
        frame.extend_from_slice(&self.data);
        frame
    }

    /// Parse a wire image
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < 3 {
            return Err(FrameError::InvalidLength {
                expected: 3,
                actual: bytes.len(),
            });
        }
        if bytes[..2] != COMMAND_LEAD {
            return Err(FrameError::InvalidHeader(bytes[0], bytes[1]));
        }
        let command_type =
            CommandType::from_byte(bytes[2]).ok_or(FrameError::UnknownCommand(bytes[2]))?;

        Ok(Self::new(command_type, bytes[3..].to_vec()))
    }

    pub fn read_status() -> Self {
        Self::new(CommandType::ReadStatus, Vec::new())
    }

    pub fn batch_write(params: &ControlParams) -> Self {
        Self::new(CommandType::BatchWrite, params.to_bytes().to_vec())
    }

    pub fn set_upload_interval(interval: u16) -> Self {
        Self::new(CommandType::SetUploadInterval, be_words(&[interval]))
    }

    pub fn set_adjust_interval(interval: u16) -> Self {
        Self::new(CommandType::SetAdjustInterval, be_words(&[interval]))
    }

    pub fn set_servo_time(move_time: u16) -> Self {
        Self::new(CommandType::SetServoTime, be_words(&[move_time]))
    }

    pub fn set_servo_position(pos_low: u16, pos_high: u16, pos_div: u16, pos_set: u16) -> Self {
        Self::new(
            CommandType::SetServoPosition,
            be_words(&[pos_low, pos_high, pos_div, pos_set]),
        )
    }

    pub fn set_work_mode(flags: u16) -> Self {
        Self::new(CommandType::SetWorkMode, be_words(&[flags]))
    }

    pub fn set_lidar_delay(delay: u16) -> Self {
        Self::new(CommandType::SetLidarDelay, be_words(&[delay]))
    }

    pub fn debug_i2c_read(addr_index: u8) -> Self {
        Self::new(CommandType::DebugI2cRead, vec![addr_index])
    }

    pub fn debug_i2c_write(addr_index: u8, data0: u8, data1: u8) -> Self {
        Self::new(CommandType::DebugI2cWrite, vec![addr_index, data0, data1])
    }

    pub fn debug_servo_ping(servo_id: u8) -> Self {
        Self::new(CommandType::DebugServoPing, vec![servo_id])
    }

    /// Move a servo: id, angle and move time
    pub fn debug_set_servo_angle(servo_id: u8, angle: u16, move_time: u16) -> Self {
        let mut data = vec![servo_id];
        data.extend_from_slice(&angle.to_be_bytes());
        data.extend_from_slice(&move_time.to_be_bytes());
        Self::new(CommandType::DebugSetServoAngle, data)
    }

    pub fn debug_read_servo_angle(servo_id: u8) -> Self {
        Self::new(CommandType::DebugReadServoAngle, vec![servo_id])
    }

    pub fn debug_read_servo_data(servo_id: u8, register: u8) -> Self {
        Self::new(CommandType::DebugReadServoData, vec![servo_id, register])
    }

    pub fn debug_monitor_servo_data(servo_id: u8, register: u8) -> Self {
        Self::new(CommandType::DebugMonitorServoData, vec![servo_id, register])
    }

    pub fn start_debug_mode(flags: u16, pos_set: u16, servo_move_time: u16) -> Self {
        Self::new(
            CommandType::StartDebugMode,
            be_words(&[flags, pos_set, servo_move_time]),
        )
    }

    pub fn start_c_mode(
        flags: u16,
        pos_low: u16,
        pos_high: u16,
        servo_move_time: u16,
        lidar_delay: u16,
    ) -> Self {
        Self::new(
            CommandType::StartCMode,
            be_words(&[flags, pos_low, pos_high, servo_move_time, lidar_delay]),
        )
    }

    pub fn start_d_mode() -> Self {
        Self::new(CommandType::StartDMode, Vec::new())
    }
}
