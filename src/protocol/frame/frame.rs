use std::fmt;

use bytes::Bytes;

use super::coding::{CloseCode, Control, OpCode};
use crate::error::{ProtocolError, Result};

/// A parsed close frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// The reason as a code.
    pub code: CloseCode,
    /// The reason as a text string.
    pub reason: String,
}

/// A single WebSocket frame with its payload already unmasked.
#[derive(Debug, Clone)]
pub struct Frame {
    fin: bool,
    opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    pub(crate) fn new(fin: bool, opcode: OpCode, payload: Bytes) -> Frame {
        Frame { fin, opcode, payload }
    }

    /// Test whether the frame is a final frame.
    #[inline]
    pub fn is_final(&self) -> bool {
        self.fin
    }

    /// Get the OpCode of the frame.
    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Get a reference to the frame's payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the frame into its payload.
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Wire length of the frame when encoded server-side (header + payload,
    /// no mask).
    pub fn len(&self) -> usize {
        let payload_len = self.payload.len();
        let header_len = if payload_len < 126 {
            2
        } else if payload_len <= u16::MAX as usize {
            4
        } else {
            10
        };
        header_len + payload_len
    }

    /// Whether the frame carries no payload bytes.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Create a new data frame.
    pub fn message(data: impl Into<Bytes>, opcode: OpCode, fin: bool) -> Frame {
        debug_assert!(opcode.is_data(), "Invalid opcode for data frame");
        Frame::new(fin, opcode, data.into())
    }

    /// Create a new ping control frame.
    pub fn ping(data: impl Into<Bytes>) -> Frame {
        Frame::new(true, OpCode::Control(Control::Ping), data.into())
    }

    /// Create a new pong control frame.
    pub fn pong(data: impl Into<Bytes>) -> Frame {
        Frame::new(true, OpCode::Control(Control::Pong), data.into())
    }

    /// Create a new close control frame.
    pub fn close(close: Option<CloseFrame>) -> Frame {
        let payload = match close {
            Some(CloseFrame { code, reason }) => {
                let mut bytes = Vec::with_capacity(2 + reason.len());
                bytes.extend_from_slice(&u16::from(code).to_be_bytes());
                bytes.extend_from_slice(reason.as_bytes());
                Bytes::from(bytes)
            }
            None => Bytes::new(),
        };
        Frame::new(true, OpCode::Control(Control::Close), payload)
    }

    /// Interpret the frame payload as close information.
    pub fn into_close(self) -> Result<Option<CloseFrame>> {
        match self.payload.len() {
            0 => Ok(None),
            1 => Err(ProtocolError::InvalidCloseSequence.into()),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]).into();
                let reason = std::str::from_utf8(&self.payload[2..])?.to_owned();
                Ok(Some(CloseFrame { code, reason }))
            }
        }
    }

    /// Append the server-side wire encoding of this frame to `output`.
    ///
    /// Server frames are never masked; the payload length picks the 7, 16
    /// or 64-bit length form.
    pub fn format(&self, output: &mut Vec<u8>) {
        let mut first = u8::from(self.opcode);
        if self.fin {
            first |= 0x80;
        }
        output.push(first);

        let len = self.payload.len();
        if len < 126 {
            output.push(len as u8);
        } else if len <= u16::MAX as usize {
            output.push(126);
            output.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            output.push(127);
            output.extend_from_slice(&(len as u64).to_be_bytes());
        }
        output.extend_from_slice(&self.payload);
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<FRAME final: {}, opcode: {}, payload length: {}>",
            self.fin,
            self.opcode,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::super::coding::Data;
    use super::*;

    #[test]
    fn format_short_frame() {
        let mut buf = Vec::new();
        Frame::ping(Bytes::from_static(&[0x01, 0x02])).format(&mut buf);
        assert_eq!(buf, vec![0x89, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn format_picks_length_form() {
        let mut buf = Vec::new();
        Frame::message(vec![0u8; 125], OpCode::Data(Data::Binary), true).format(&mut buf);
        assert_eq!(&buf[..2], &[0x82, 125]);

        let mut buf = Vec::new();
        Frame::message(vec![0u8; 126], OpCode::Data(Data::Binary), true).format(&mut buf);
        assert_eq!(&buf[..4], &[0x82, 126, 0x00, 0x7e]);

        let mut buf = Vec::new();
        Frame::message(vec![0u8; 65536], OpCode::Data(Data::Binary), true).format(&mut buf);
        assert_eq!(&buf[..10], &[0x82, 127, 0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn non_final_frame_clears_fin_bit() {
        let mut buf = Vec::new();
        Frame::message(Bytes::from_static(b"ab"), OpCode::Data(Data::Text), false).format(&mut buf);
        assert_eq!(&buf[..2], &[0x01, 0x02]);
    }

    #[test]
    fn close_payload_round_trip() {
        let close = CloseFrame { code: CloseCode::Normal, reason: "done".into() };
        let frame = Frame::close(Some(close.clone()));
        assert_eq!(frame.payload()[..2], [0x03, 0xe8]);
        assert_eq!(frame.into_close().unwrap(), Some(close));
    }

    #[test]
    fn close_without_payload() {
        assert_eq!(Frame::close(None).into_close().unwrap(), None);
    }

    #[test]
    fn close_with_one_byte_payload_is_invalid() {
        let frame = Frame::new(true, OpCode::Control(Control::Close), Bytes::from_static(&[0x03]));
        assert!(frame.into_close().is_err());
    }

    #[test]
    fn frame_len_counts_header() {
        assert_eq!(Frame::ping(Bytes::new()).len(), 2);
        assert_eq!(Frame::message(vec![0u8; 126], OpCode::Data(Data::Binary), true).len(), 4 + 126);
        assert_eq!(
            Frame::message(vec![0u8; 65536], OpCode::Data(Data::Binary), true).len(),
            10 + 65536
        );
    }
}
