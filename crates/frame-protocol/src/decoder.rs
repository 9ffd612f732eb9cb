//! Byte-Stream Frame Decoder
//!
//! Scans the inbound byte buffer one byte at a time for either lead
//! sequence, then reads and validates the rest of the frame once enough
//! bytes have arrived. Both frame families share one scanning loop, so a
//! corrupted byte costs at most the prefix that was already matched.

use crate::error::FrameError;
use crate::frame::{AckFrame, DataFrame, Frame};
use crate::wire::{ACK_HEADER_LEN, CMD_LEAD1, CMD_LEAD2, DATA_BODY_LEN, DATA_LEAD1, DATA_LEAD2};
use ring_buffer::RingBuffer;
use tracing::trace;

/// Decoder position within the byte stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderState {
    /// No partial match
    #[default]
    Seek,
    /// Saw the first data lead byte
    SawDataLead,
    /// Saw the first ack lead byte
    SawCmdLead,
    /// Data lead matched, waiting for the full body
    DataBody,
    /// Ack lead matched, waiting for command id and length
    CmdHeader,
    /// Ack header read, waiting for payload and checksum
    CmdBody { cmd_id: u8, length: u8 },
}

impl DecoderState {
    /// Next state after scanning one byte in a lead-matching state
    fn scan(self, byte: u8) -> Self {
        match (self, byte) {
            (DecoderState::SawDataLead, DATA_LEAD2) => DecoderState::DataBody,
            (DecoderState::SawCmdLead, CMD_LEAD2) => DecoderState::CmdHeader,
            (_, DATA_LEAD1) => DecoderState::SawDataLead,
            (_, CMD_LEAD1) => DecoderState::SawCmdLead,
            _ => DecoderState::Seek,
        }
    }
}

/// Frame decoder state machine
///
/// Never blocks: when the next step needs more bytes than the buffer holds,
/// [`FrameDecoder::decode_next`] returns `None` and resumes from the same
/// state on the next call.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: DecoderState,
}

impl FrameDecoder {
    /// Create a decoder in the `Seek` state
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Drop any partial match and return to `Seek`
    pub fn reset(&mut self) {
        self.state = DecoderState::Seek;
    }

    /// Consume bytes until one frame attempt completes or the input runs dry
    ///
    /// Returns `Some(Ok(frame))` for a validated frame, `Some(Err(_))` for a
    /// frame that failed validation (its bytes are discarded), and `None`
    /// when more input is needed.
    pub fn decode_next(&mut self, input: &RingBuffer<u8>) -> Option<Result<Frame, FrameError>> {
        loop {
            match self.state {
                DecoderState::DataBody => {
                    let body = input.read_exact(DATA_BODY_LEN)?;
                    self.state = DecoderState::Seek;
                    return Some(DataFrame::decode_body(&body).map(Frame::Data));
                }
                DecoderState::CmdHeader => {
                    let header = input.read_exact(ACK_HEADER_LEN)?;
                    trace!(cmd_id = header[0], length = header[1], "ack header");
                    self.state = DecoderState::CmdBody {
                        cmd_id: header[0],
                        length: header[1],
                    };
                }
                DecoderState::CmdBody { cmd_id, length } => {
                    let body = input.read_exact(usize::from(length) + 1)?;
                    self.state = DecoderState::Seek;
                    return Some(AckFrame::decode(cmd_id, length, &body).map(Frame::Ack));
                }
                scanning => {
                    let byte = input.pop()?;
                    self.state = scanning.scan(byte);
                }
            }
        }
    }

    /// Decode everything currently buffered
    pub fn decode_available(&mut self, input: &RingBuffer<u8>) -> Vec<Result<Frame, FrameError>> {
        std::iter::from_fn(|| self.decode_next(input)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ack_checksum, ChannelData};
    use crate::wire::DATA_TAIL;

    fn sample_frame(master_seq: u16) -> DataFrame {
        DataFrame {
            channels: [
                ChannelData::new(100, 1000, 1100, 50, 60),
                ChannelData::new(-50, 2000, 2100, 51, 61),
                ChannelData::new(200, 3000, 3100, 52, 62),
                ChannelData::new(-25, 4000, 4100, 53, 63),
            ],
            master_seq,
            slave_seq: 7,
            device_state: 1,
        }
    }

    fn ack_bytes(cmd_id: u8, payload: &[u8], checksum: u8) -> Vec<u8> {
        let mut bytes = vec![CMD_LEAD1, CMD_LEAD2, cmd_id, payload.len() as u8];
        bytes.extend_from_slice(payload);
        bytes.push(checksum);
        bytes
    }

    fn buffer_with(bytes: &[u8]) -> RingBuffer<u8> {
        let buffer = RingBuffer::new(1024).unwrap();
        assert_eq!(buffer.write(bytes), bytes.len());
        buffer
    }

    #[test]
    fn test_decodes_data_frame() {
        let frame = sample_frame(1);
        let input = buffer_with(&frame.to_bytes());
        let mut decoder = FrameDecoder::new();

        assert_eq!(decoder.decode_next(&input), Some(Ok(Frame::Data(frame))));
        assert_eq!(decoder.decode_next(&input), None);
        assert_eq!(decoder.state(), DecoderState::Seek);
    }

    #[test]
    fn test_end_to_end_channel_mapping() {
        let mut bytes = vec![DATA_LEAD1, DATA_LEAD2];
        for adc in [100i16, -50, 200, -25] {
            bytes.extend_from_slice(&adc.to_le_bytes());
        }
        for sdadc in [-1200i16, 300, 4500, -7, 0, 32000, -32000, 12] {
            bytes.extend_from_slice(&sdadc.to_le_bytes());
        }
        bytes.extend_from_slice(&[20, 40, 60, 80, 1, 2, 3, 4]);
        bytes.extend_from_slice(&[0x01, 0x00, 0x02, 0x00, 0x00, DATA_TAIL]);

        let input = buffer_with(&bytes);
        let frame = match FrameDecoder::new().decode_next(&input) {
            Some(Ok(Frame::Data(frame))) => frame,
            other => panic!("expected data frame, got {:?}", other),
        };

        let ch0 = frame.channels[0];
        assert_eq!(ch0.adc(), -50);
        assert_eq!(ch0.sdadc0(), -1200);
        assert_eq!(ch0.sdadc1(), -7);
        assert_eq!(ch0.adj0(), 20);
        assert_eq!(ch0.adj1(), 1);

        let expected = 1000.0 * (-1200.0 + 32767.0) * 3300.0 / 65535.0 / ((256.0 - 20.0) * 3.92);
        assert!((ch0.current() - expected).abs() < 1e-6);
        assert_eq!(frame.master_seq, 1);
        assert_eq!(frame.slave_seq, 2);
    }

    #[test]
    fn test_resynchronizes_after_corrupted_frame() {
        let valid = sample_frame(1);
        let mut corrupted = sample_frame(2).to_bytes();
        *corrupted.last_mut().unwrap() = 0x00;
        let payload = [0x10, 0x20];
        let ack = ack_bytes(0x03, &payload, ack_checksum(0x03, 2, &payload));

        let mut stream = valid.to_bytes();
        stream.extend_from_slice(&corrupted);
        stream.extend_from_slice(&ack);

        let input = buffer_with(&stream);
        let results = FrameDecoder::new().decode_available(&input);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], Ok(Frame::Data(valid)));
        assert_eq!(
            results[1],
            Err(FrameError::BadTail {
                expected: DATA_TAIL,
                actual: 0x00
            })
        );
        match &results[2] {
            Ok(Frame::Ack(ack)) => {
                assert_eq!(ack.cmd_id(), 0x03);
                assert_eq!(ack.payload(), &payload);
            }
            other => panic!("expected ack frame, got {:?}", other),
        }
    }

    #[test]
    fn test_checksum_off_by_one_rejected() {
        let payload = [0x01, 0x02];
        let good = ack_checksum(0x01, 2, &payload);
        let input = buffer_with(&ack_bytes(0x01, &payload, good.wrapping_add(1)));

        let results = FrameDecoder::new().decode_available(&input);
        assert_eq!(
            results,
            vec![Err(FrameError::ChecksumError {
                expected: good,
                actual: good.wrapping_add(1)
            })]
        );
    }

    #[test]
    fn test_suspends_until_body_arrives() {
        let bytes = sample_frame(9).to_bytes();
        let input = RingBuffer::new(64).unwrap();
        let mut decoder = FrameDecoder::new();

        input.write(&bytes[..25]);
        assert_eq!(decoder.decode_next(&input), None);
        assert_eq!(decoder.state(), DecoderState::DataBody);
        assert_eq!(input.available(), 23);

        input.write(&bytes[25..]);
        assert!(matches!(decoder.decode_next(&input), Some(Ok(Frame::Data(_)))));
    }

    #[test]
    fn test_ack_split_across_writes() {
        let payload = [0xAA, 0xBB, 0xCC];
        let bytes = ack_bytes(0x07, &payload, ack_checksum(0x07, 3, &payload));
        let input = RingBuffer::new(64).unwrap();
        let mut decoder = FrameDecoder::new();

        input.write(&bytes[..3]);
        assert_eq!(decoder.decode_next(&input), None);
        input.write(&bytes[3..5]);
        assert_eq!(decoder.decode_next(&input), None);
        assert!(matches!(decoder.state(), DecoderState::CmdBody { cmd_id: 0x07, length: 3 }));
        input.write(&bytes[5..]);
        assert!(matches!(decoder.decode_next(&input), Some(Ok(Frame::Ack(_)))));
    }

    #[test]
    fn test_repeated_and_crossed_lead_bytes() {
        let mut decoder = FrameDecoder::new();
        let input = RingBuffer::new(16).unwrap();

        input.write(&[DATA_LEAD1, DATA_LEAD1]);
        assert_eq!(decoder.decode_next(&input), None);
        assert_eq!(decoder.state(), DecoderState::SawDataLead);

        input.write(&[CMD_LEAD1]);
        decoder.decode_next(&input);
        assert_eq!(decoder.state(), DecoderState::SawCmdLead);

        input.write(&[CMD_LEAD1]);
        decoder.decode_next(&input);
        assert_eq!(decoder.state(), DecoderState::SawCmdLead);

        input.write(&[DATA_LEAD1]);
        decoder.decode_next(&input);
        assert_eq!(decoder.state(), DecoderState::SawDataLead);

        input.write(&[0x00]);
        decoder.decode_next(&input);
        assert_eq!(decoder.state(), DecoderState::Seek);
    }

    #[test]
    fn test_lead_split_by_noise_is_ignored() {
        let mut bytes = vec![DATA_LEAD1, 0x00, DATA_LEAD2];
        bytes.extend_from_slice(&sample_frame(3).to_bytes());
        let input = buffer_with(&bytes);

        let results = FrameDecoder::new().decode_available(&input);
        assert_eq!(results, vec![Ok(Frame::Data(sample_frame(3)))]);
    }

    #[test]
    fn test_zero_length_ack() {
        let input = buffer_with(&ack_bytes(0x01, &[], ack_checksum(0x01, 0, &[])));
        match FrameDecoder::new().decode_next(&input) {
            Some(Ok(Frame::Ack(ack))) => assert!(ack.payload().is_empty()),
            other => panic!("expected ack frame, got {:?}", other),
        }
    }

    #[test]
    fn test_longest_ack_fits_smallest_inbound_buffer() {
        use crate::wire::{MAX_ACK_PAYLOAD, MAX_FRAME_LEN};

        let ack = AckFrame::new(0x09, vec![0x5A; MAX_ACK_PAYLOAD]).unwrap();
        let bytes = ack.to_bytes();
        assert_eq!(bytes.len(), MAX_FRAME_LEN);

        let input = RingBuffer::new(MAX_FRAME_LEN).unwrap();
        assert_eq!(input.write(&bytes), MAX_FRAME_LEN);
        assert_eq!(FrameDecoder::new().decode_next(&input), Some(Ok(Frame::Ack(ack))));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn noise() -> impl Strategy<Value = Vec<u8>> {
            prop::collection::vec(
                any::<u8>().prop_filter("lead byte", |b| *b != DATA_LEAD1 && *b != CMD_LEAD1),
                0..64,
            )
        }

        proptest! {
            #[test]
            fn prop_recovers_frames_after_noise(
                prefix in noise(),
                gap in noise(),
                master_seq in any::<u16>(),
                chunk in 1usize..16,
            ) {
                let frame = sample_frame(master_seq);
                let payload = [master_seq as u8];
                let ack = ack_bytes(0x05, &payload, ack_checksum(0x05, 1, &payload));

                let mut stream = prefix;
                stream.extend_from_slice(&frame.to_bytes());
                stream.extend_from_slice(&gap);
                stream.extend_from_slice(&ack);

                let input = RingBuffer::new(256).unwrap();
                let mut decoder = FrameDecoder::new();
                let mut results = Vec::new();
                for piece in stream.chunks(chunk) {
                    input.write(piece);
                    results.extend(decoder.decode_available(&input));
                }

                prop_assert_eq!(results.len(), 2);
                prop_assert_eq!(&results[0], &Ok(Frame::Data(frame)));
                prop_assert!(matches!(&results[1], Ok(Frame::Ack(a)) if a.payload() == &payload[..]));
            }
        }
    }
}
