//! Incremental WebSocket frame decoding.

pub mod coding;

mod frame;
pub(crate) mod mask;

pub use self::frame::{CloseFrame, Frame};

use bytes::{Bytes, BytesMut};
use log::trace;

use self::coding::OpCode;
use self::mask::apply_mask;
use crate::buffer::ChunkBuffer;
use crate::error::{CapacityError, ProtocolError, Result};

/// Decode stage of the frame currently in progress.
///
/// Each variant carries the header fields resolved by the stages already
/// passed, so a suspended decoder resumes exactly where it stopped.
#[derive(Debug, Clone, Copy)]
enum Stage {
    AwaitingHeader,
    AwaitingExtendedLength { fin: bool, opcode: OpCode, length_code: u8 },
    AwaitingMaskKey { fin: bool, opcode: OpCode, length: usize },
    AwaitingPayload { fin: bool, opcode: OpCode, length: usize, mask: [u8; 4] },
}

/// Incremental decoder for masked client-to-server frames.
///
/// The transport feeds byte segments in as they arrive; [`next_frame`]
/// advances through the decode stages for as long as enough bytes are
/// buffered and suspends by returning `Ok(None)` otherwise. Nothing about
/// frame boundaries is assumed: a header split across three reads decodes
/// the same as one delivered whole.
///
/// [`next_frame`]: FrameDecoder::next_frame
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: ChunkBuffer,
    stage: Stage,
}

impl Default for Stage {
    fn default() -> Stage {
        Stage::AwaitingHeader
    }
}

impl FrameDecoder {
    /// Create a decoder with an empty buffer, awaiting a frame header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment received from the transport.
    pub fn feed(&mut self, segment: Bytes) {
        self.buffer.push(segment);
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.available()
    }

    /// Try to decode one frame from the buffered bytes.
    ///
    /// Returns `Ok(None)` when the current stage needs more bytes than are
    /// buffered; feeding more data and calling again resumes at that stage.
    /// `size_budget` is the number of payload bytes the caller is still
    /// willing to accept for the message in progress; a data frame declaring
    /// more is rejected before its payload is consumed or allocated.
    /// Control frames are not counted against the budget.
    pub fn next_frame(&mut self, size_budget: Option<u64>) -> Result<Option<Frame>> {
        loop {
            match self.stage {
                Stage::AwaitingHeader => {
                    if self.buffer.available() < 2 {
                        return Ok(None);
                    }
                    let head = self.buffer.consume_exact(2);
                    trace!("parsed frame header bytes {:?}", &head[..]);

                    let fin = head[0] & 0x80 != 0;
                    if head[0] & 0x70 != 0 {
                        return Err(ProtocolError::NonZeroReservedBits.into());
                    }
                    let opcode = OpCode::from(head[0] & 0x0f);
                    match opcode {
                        OpCode::Data(coding::Data::Reserved(i)) => {
                            return Err(ProtocolError::UnknownDataFrameType(i).into())
                        }
                        OpCode::Control(coding::Control::Reserved(i)) => {
                            return Err(ProtocolError::UnknownControlFrameType(i).into())
                        }
                        _ => {}
                    }

                    // The server must close the connection upon receiving a
                    // frame that is not masked. (RFC 6455)
                    if head[1] & 0x80 == 0 {
                        return Err(ProtocolError::UnmaskedFrameFromClient.into());
                    }
                    let length_code = head[1] & 0x7f;

                    // All control frames MUST have a payload length of 125
                    // bytes or less and MUST NOT be fragmented. (RFC 6455)
                    if let OpCode::Control(_) = opcode {
                        if !fin {
                            return Err(ProtocolError::FragmentedControlFrame.into());
                        }
                        if length_code > 125 {
                            return Err(ProtocolError::ControlFrameTooBig.into());
                        }
                    }

                    self.stage = Stage::AwaitingExtendedLength { fin, opcode, length_code };
                }

                Stage::AwaitingExtendedLength { fin, opcode, length_code } => {
                    let length = match length_code {
                        126 => {
                            if self.buffer.available() < 2 {
                                return Ok(None);
                            }
                            let ext = self.buffer.consume_exact(2);
                            u64::from(u16::from_be_bytes([ext[0], ext[1]]))
                        }
                        127 => {
                            if self.buffer.available() < 8 {
                                return Ok(None);
                            }
                            let ext = self.buffer.consume_exact(8);
                            u64::from_be_bytes([
                                ext[0], ext[1], ext[2], ext[3], ext[4], ext[5], ext[6], ext[7],
                            ])
                        }
                        code => u64::from(code),
                    };
                    trace!("frame payload length {}", length);

                    if length & (1 << 63) != 0 {
                        return Err(ProtocolError::InvalidPayloadLength.into());
                    }
                    if opcode.is_data() {
                        if let Some(budget) = size_budget {
                            if length > budget {
                                return Err(CapacityError::MessageTooLong {
                                    size: length,
                                    max_size: budget,
                                }
                                .into());
                            }
                        }
                    }
                    let length = usize::try_from(length).map_err(|_| {
                        CapacityError::MessageTooLong { size: length, max_size: usize::MAX as u64 }
                    })?;

                    self.stage = Stage::AwaitingMaskKey { fin, opcode, length };
                }

                Stage::AwaitingMaskKey { fin, opcode, length } => {
                    if self.buffer.available() < 4 {
                        return Ok(None);
                    }
                    let key = self.buffer.consume_exact(4);
                    let mask = [key[0], key[1], key[2], key[3]];
                    self.stage = Stage::AwaitingPayload { fin, opcode, length, mask };
                }

                Stage::AwaitingPayload { fin, opcode, length, mask } => {
                    if self.buffer.available() < length {
                        return Ok(None);
                    }
                    let raw = self.buffer.consume_spanning(length);
                    let mut payload = match raw.try_into_mut() {
                        Ok(unique) => unique,
                        Err(shared) => BytesMut::from(&shared[..]),
                    };
                    apply_mask(&mut payload, mask);

                    self.stage = Stage::AwaitingHeader;
                    return Ok(Some(Frame::new(fin, opcode, payload.freeze())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::coding::{Control, Data, OpCode};
    use super::*;
    use crate::error::Error;

    const MASK: [u8; 4] = [0xa1, 0x5c, 0x03, 0xe9];

    /// Build the wire bytes of a masked client frame.
    fn wire_frame(first_byte: u8, payload: &[u8]) -> Vec<u8> {
        let mut wire = vec![first_byte];
        if payload.len() < 126 {
            wire.push(0x80 | payload.len() as u8);
        } else if payload.len() <= u16::MAX as usize {
            wire.push(0x80 | 126);
            wire.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        } else {
            wire.push(0x80 | 127);
            wire.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        }
        wire.extend_from_slice(&MASK);
        let mut masked = payload.to_vec();
        apply_mask(&mut masked, MASK);
        wire.extend_from_slice(&masked);
        wire
    }

    fn decode_one(wire: &[u8]) -> Result<Option<Frame>> {
        let mut decoder = FrameDecoder::new();
        decoder.feed(Bytes::copy_from_slice(wire));
        decoder.next_frame(None)
    }

    #[test]
    fn single_text_frame() {
        let frame = decode_one(&wire_frame(0x81, b"Hello")).unwrap().unwrap();
        assert!(frame.is_final());
        assert_eq!(frame.opcode(), OpCode::Data(Data::Text));
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn empty_payload_frame() {
        let frame = decode_one(&wire_frame(0x82, b"")).unwrap().unwrap();
        assert_eq!(frame.opcode(), OpCode::Data(Data::Binary));
        assert_eq!(frame.payload(), b"");
    }

    #[test]
    fn sixteen_bit_extended_length() {
        // Indicator 126 with extension bytes 0x00 0x7e resolves to 126.
        let payload = vec![0x55u8; 126];
        let wire = wire_frame(0x82, &payload);
        assert_eq!(&wire[1..4], &[0x80 | 126, 0x00, 0x7e]);
        let frame = decode_one(&wire).unwrap().unwrap();
        assert_eq!(frame.payload(), &payload[..]);
    }

    #[test]
    fn sixty_four_bit_extended_length() {
        // Indicator 127 with extension 0x00..0x01 0x00 resolves to 65536.
        let payload = vec![0xaau8; 65536];
        let wire = wire_frame(0x82, &payload);
        assert_eq!(&wire[1..10], &[0x80 | 127, 0, 0, 0, 0, 0, 1, 0, 0]);
        let frame = decode_one(&wire).unwrap().unwrap();
        assert_eq!(frame.payload().len(), 65536);
    }

    #[test]
    fn resumes_across_arbitrarily_split_input() {
        let wire = wire_frame(0x89, b"ping me");
        // Deliver one byte at a time, checking the machine suspends in
        // between instead of failing.
        let mut decoder = FrameDecoder::new();
        for byte in &wire[..wire.len() - 1] {
            decoder.feed(Bytes::copy_from_slice(&[*byte]));
            assert!(decoder.next_frame(None).unwrap().is_none());
        }
        decoder.feed(Bytes::copy_from_slice(&wire[wire.len() - 1..]));
        let frame = decoder.next_frame(None).unwrap().unwrap();
        assert_eq!(frame.opcode(), OpCode::Control(Control::Ping));
        assert_eq!(frame.payload(), b"ping me");
    }

    #[test]
    fn two_frames_from_one_segment() {
        let mut wire = wire_frame(0x81, b"one");
        wire.extend_from_slice(&wire_frame(0x81, b"two"));
        let mut decoder = FrameDecoder::new();
        decoder.feed(Bytes::from(wire));
        assert_eq!(decoder.next_frame(None).unwrap().unwrap().payload(), b"one");
        assert_eq!(decoder.next_frame(None).unwrap().unwrap().payload(), b"two");
        assert!(decoder.next_frame(None).unwrap().is_none());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn unmasked_frame_is_fatal() {
        // Text frame with the mask bit unset.
        let wire = [0x81u8, 0x03, b'a', b'b', b'c'];
        assert!(matches!(
            decode_one(&wire),
            Err(Error::Protocol(ProtocolError::UnmaskedFrameFromClient))
        ));
    }

    #[test]
    fn reserved_bits_are_fatal() {
        let mut wire = wire_frame(0x81, b"x");
        wire[0] |= 0x40;
        assert!(matches!(
            decode_one(&wire),
            Err(Error::Protocol(ProtocolError::NonZeroReservedBits))
        ));
    }

    #[test]
    fn reserved_opcodes_are_fatal() {
        assert!(matches!(
            decode_one(&wire_frame(0x83, b"")),
            Err(Error::Protocol(ProtocolError::UnknownDataFrameType(3)))
        ));
        assert!(matches!(
            decode_one(&wire_frame(0x8f, b"")),
            Err(Error::Protocol(ProtocolError::UnknownControlFrameType(15)))
        ));
    }

    #[test]
    fn fragmented_control_frame_is_fatal() {
        // Ping with FIN unset.
        assert!(matches!(
            decode_one(&wire_frame(0x09, b"p")),
            Err(Error::Protocol(ProtocolError::FragmentedControlFrame))
        ));
    }

    #[test]
    fn oversized_control_frame_is_fatal() {
        let wire = wire_frame(0x89, &[0u8; 126]);
        assert!(matches!(
            decode_one(&wire),
            Err(Error::Protocol(ProtocolError::ControlFrameTooBig))
        ));
    }

    #[test]
    fn budget_rejects_before_payload_arrives() {
        // Single frame declaring 11 bytes against a budget of 10. Only the
        // header is fed: rejection must not wait for the payload.
        let wire = wire_frame(0x81, &[0u8; 11]);
        let mut decoder = FrameDecoder::new();
        decoder.feed(Bytes::copy_from_slice(&wire[..2]));
        assert!(matches!(
            decoder.next_frame(Some(10)),
            Err(Error::Capacity(CapacityError::MessageTooLong { size: 11, max_size: 10 }))
        ));
    }

    #[test]
    fn budget_ignores_control_frames() {
        let wire = wire_frame(0x89, b"heartbeat");
        let mut decoder = FrameDecoder::new();
        decoder.feed(Bytes::from(wire));
        let frame = decoder.next_frame(Some(0)).unwrap().unwrap();
        assert_eq!(frame.opcode(), OpCode::Control(Control::Ping));
    }

    #[test]
    fn sixty_four_bit_length_with_high_bit_is_fatal() {
        let mut wire = vec![0x82, 0x80 | 127];
        wire.extend_from_slice(&(1u64 << 63).to_be_bytes());
        wire.extend_from_slice(&MASK);
        assert!(matches!(
            decode_one(&wire),
            Err(Error::Protocol(ProtocolError::InvalidPayloadLength))
        ));
    }

    #[test]
    fn mask_key_is_per_frame() {
        // Same payload under two different keys decodes identically.
        let mut wire = wire_frame(0x81, b"abc");
        let mut second = vec![0x81, 0x80 | 3];
        let other_key = [1u8, 2, 3, 4];
        second.extend_from_slice(&other_key);
        let mut masked = b"abc".to_vec();
        apply_mask(&mut masked, other_key);
        second.extend_from_slice(&masked);
        wire.extend_from_slice(&second);

        let mut decoder = FrameDecoder::new();
        decoder.feed(Bytes::from(wire));
        assert_eq!(decoder.next_frame(None).unwrap().unwrap().payload(), b"abc");
        assert_eq!(decoder.next_frame(None).unwrap().unwrap().payload(), b"abc");
    }
}
