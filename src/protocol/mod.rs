//! WebSocket protocol implementation, server side.

pub mod frame;

mod message;

pub use self::message::Message;

use std::io::{self, Read, Write};

use bytes::Bytes;
use log::{debug, trace};

use self::frame::coding::{CloseCode, Control, Data, OpCode};
use self::frame::{CloseFrame, Frame, FrameDecoder};
use self::message::{IncompleteMessage, IncompleteMessageType};
use crate::error::{Error, ProtocolError, Result};
use crate::util::NonBlockingResult;

/// Size of the chunks read from the underlying stream by [`Connection`].
pub(crate) const READ_CHUNK_SIZE: usize = 4096;

/// Configuration for one decode session.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// The maximum size of one assembled message, counted over all of its
    /// fragments. `None` disables the limit. The default is 1 MiB, the sole
    /// guard against a peer growing a message without bound.
    pub max_message_size: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig { max_message_size: Some(1024 * 1024) }
    }
}

/// Whether a session still decodes incoming frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Closed,
}

/// Per-connection decode context.
///
/// Owns the buffered byte segments, the frame decode stage and the message
/// accumulator for one connection; nothing is shared between sessions. The
/// transport appends bytes with [`feed`] whenever they arrive and then
/// drains completed messages with [`poll_message`]. Neither call blocks:
/// when the buffered bytes run out mid-frame the session simply reports
/// that it has nothing yet.
///
/// [`feed`]: Session::feed
/// [`poll_message`]: Session::poll_message
#[derive(Debug, Default)]
pub struct Session {
    decoder: FrameDecoder,
    incomplete: Option<IncompleteMessage>,
    frames_received: u64,
    state: SessionState,
    config: SessionConfig,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Active
    }
}

impl Session {
    /// Create a session with the given configuration.
    pub fn new(config: SessionConfig) -> Self {
        Session { config, ..Session::default() }
    }

    /// Append a segment of bytes received from the transport.
    pub fn feed<B: Into<Bytes>>(&mut self, segment: B) {
        self.decoder.feed(segment.into());
    }

    /// Whether the session still accepts frames (no Close seen yet).
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Try to produce the next incoming message from the buffered bytes.
    ///
    /// Data frames are reassembled until their FIN frame and delivered as
    /// one [`Message`]; control frames are delivered individually as they
    /// complete. Returns `Ok(None)` when more bytes are needed, or always
    /// once a Close frame has been delivered. Every error is fatal for the
    /// connection that produced it and only for that connection.
    pub fn poll_message(&mut self) -> Result<Option<Message>> {
        while self.state == SessionState::Active {
            let frame = match self.decoder.next_frame(self.size_budget())? {
                Some(frame) => frame,
                None => return Ok(None),
            };
            debug!("received frame {}", frame);
            if let Some(message) = self.dispatch(frame)? {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    /// Payload bytes still acceptable for the message in progress.
    fn size_budget(&self) -> Option<u64> {
        self.config.max_message_size.map(|max| {
            let accumulated = self.incomplete.as_ref().map_or(0, IncompleteMessage::len);
            (max as u64).saturating_sub(accumulated as u64)
        })
    }

    fn dispatch(&mut self, frame: Frame) -> Result<Option<Message>> {
        match frame.opcode() {
            OpCode::Control(control) => self.on_control(control, frame),
            OpCode::Data(data) => self.on_data(data, frame),
        }
    }

    fn on_control(&mut self, control: Control, frame: Frame) -> Result<Option<Message>> {
        match control {
            Control::Close => {
                // Terminal: discard whatever else is buffered along with
                // any half-assembled message.
                self.state = SessionState::Closed;
                self.incomplete = None;
                Ok(Some(Message::Close(frame.into_close()?)))
            }
            Control::Ping => Ok(Some(Message::Ping(frame.into_payload()))),
            Control::Pong => Ok(Some(Message::Pong(frame.into_payload()))),
            Control::Reserved(code) => Err(ProtocolError::UnknownControlFrameType(code).into()),
        }
    }

    fn on_data(&mut self, data: Data, frame: Frame) -> Result<Option<Message>> {
        let fin = frame.is_final();
        match data {
            Data::Continue => match self.incomplete.as_mut() {
                Some(incomplete) => incomplete.extend(frame.payload())?,
                None => return Err(ProtocolError::UnexpectedContinueFrame.into()),
            },
            _ if self.incomplete.is_some() => {
                return Err(ProtocolError::ExpectedFragment(data).into());
            }
            Data::Text | Data::Binary => {
                let message_type = match data {
                    Data::Text => IncompleteMessageType::Text,
                    _ => IncompleteMessageType::Binary,
                };
                let mut incomplete = IncompleteMessage::new(message_type);
                incomplete.extend(frame.payload())?;
                self.incomplete = Some(incomplete);
            }
            Data::Reserved(code) => return Err(ProtocolError::UnknownDataFrameType(code).into()),
        }
        self.frames_received += 1;

        if fin {
            trace!("message complete after {} frames", self.frames_received);
            self.frames_received = 0;
            let message =
                self.incomplete.take().expect("Bug: no accumulated message at FIN").complete()?;
            Ok(Some(message))
        } else {
            Ok(None)
        }
    }
}

/// Close-handshake progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Active,
    ClosedByUs,
    ClosedByPeer,
}

/// A WebSocket connection over a `Read + Write` byte stream.
///
/// Drives a [`Session`] from the stream and writes replies back to it.
/// Pings are answered automatically, as is the peer's Close frame; both
/// are still handed to the caller so the application sees every control
/// frame.
#[derive(Debug)]
pub struct Connection<Stream> {
    stream: Stream,
    session: Session,
    /// Pending pong reply. Only the most recently received ping is
    /// answered. (RFC 6455 permits exactly that.)
    pong: Option<Frame>,
    out_buffer: Vec<u8>,
    state: ConnectionState,
}

impl<Stream> Connection<Stream> {
    /// Wrap a stream whose handshake already happened elsewhere.
    pub fn from_raw_stream(stream: Stream, config: SessionConfig) -> Self {
        Connection {
            stream,
            session: Session::new(config),
            pong: None,
            out_buffer: Vec::new(),
            state: ConnectionState::Active,
        }
    }

    /// Wrap a stream, buffering bytes that were read together with the end
    /// of the handshake.
    pub fn from_partially_read(stream: Stream, part: Vec<u8>, config: SessionConfig) -> Self {
        let mut connection = Connection::from_raw_stream(stream, config);
        connection.session.feed(part);
        connection
    }

    /// Returns a shared reference to the inner stream.
    pub fn get_ref(&self) -> &Stream {
        &self.stream
    }

    /// Returns a mutable reference to the inner stream.
    pub fn get_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }
}

impl<Stream: Read + Write> Connection<Stream> {
    /// Read the next message from the peer.
    ///
    /// Blocks for as long as the underlying stream blocks. Once the close
    /// handshake has finished this returns [`Error::ConnectionClosed`] and
    /// the connection is only good for dropping.
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            // Queued replies go out opportunistically; a blocked write must
            // not stall reading.
            self.write_pending().no_block()?;

            if let Some(message) = self.session.poll_message()? {
                match &message {
                    Message::Ping(payload) => self.pong = Some(Frame::pong(payload.clone())),
                    Message::Close(close) => self.peer_closed(close.as_ref()),
                    _ => {}
                }
                return Ok(message);
            }
            if self.state == ConnectionState::ClosedByPeer {
                self.write_pending()?;
                return Err(Error::ConnectionClosed);
            }

            let mut chunk = [0; READ_CHUNK_SIZE];
            let size = self.stream.read(&mut chunk)?;
            if size == 0 {
                return Err(ProtocolError::ResetWithoutClosingHandshake.into());
            }
            trace!("read {} bytes from the stream", size);
            self.session.feed(Bytes::copy_from_slice(&chunk[..size]));
        }
    }

    /// Send a message to the peer.
    ///
    /// Server-to-client frames are never masked. Data messages go out as a
    /// single unfragmented frame.
    pub fn send(&mut self, message: Message) -> Result<()> {
        if self.state != ConnectionState::Active {
            return Err(ProtocolError::SendAfterClosing.into());
        }
        let frame = match message {
            Message::Text(text) => Frame::message(text, OpCode::Data(Data::Text), true),
            Message::Binary(data) => Frame::message(data, OpCode::Data(Data::Binary), true),
            Message::Ping(data) => Frame::ping(data),
            Message::Pong(data) => Frame::pong(data),
            Message::Close(close) => return self.close(close),
        };
        frame.format(&mut self.out_buffer);
        self.write_pending()
    }

    /// Start the close handshake, if it has not been started yet.
    pub fn close(&mut self, close: Option<CloseFrame>) -> Result<()> {
        if self.state == ConnectionState::Active {
            Frame::close(close).format(&mut self.out_buffer);
            self.state = ConnectionState::ClosedByUs;
        }
        self.write_pending()
    }

    /// Flush everything queued for the peer.
    pub fn write_pending(&mut self) -> Result<()> {
        if let Some(pong) = self.pong.take() {
            pong.format(&mut self.out_buffer);
        }
        while !self.out_buffer.is_empty() {
            let written = self.stream.write(&self.out_buffer)?;
            if written == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write the queued frames",
                )));
            }
            self.out_buffer.drain(..written);
        }
        self.stream.flush()?;
        Ok(())
    }

    /// The peer sent a Close frame; queue our side of the close handshake.
    fn peer_closed(&mut self, close: Option<&CloseFrame>) {
        if self.state == ConnectionState::Active {
            let reply = match close {
                Some(CloseFrame { code, .. }) if !code.is_allowed() => Frame::close(Some(
                    CloseFrame { code: CloseCode::Protocol, reason: "Protocol violation".into() },
                )),
                Some(_) => {
                    Frame::close(Some(CloseFrame { code: CloseCode::Normal, reason: String::new() }))
                }
                None => Frame::close(None),
            };
            reply.format(&mut self.out_buffer);
        }
        self.state = ConnectionState::ClosedByPeer;
    }
}
