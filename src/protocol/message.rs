use std::fmt;

use bytes::{Bytes, BytesMut};

use super::frame::CloseFrame;
use crate::error::Result;

mod string_collect {
    use utf8::DecodeError;

    use crate::error::{Error, Result};

    /// Collects a UTF-8 string from byte chunks that may split code points
    /// at arbitrary positions.
    #[derive(Debug)]
    pub struct StringCollector {
        data: String,
        incomplete: Option<utf8::Incomplete>,
    }

    impl StringCollector {
        pub fn new() -> Self {
            StringCollector { data: String::new(), incomplete: None }
        }

        pub fn len(&self) -> usize {
            self.data.len() + self.incomplete.as_ref().map_or(0, |i| usize::from(i.buffer_len))
        }

        pub fn extend<T: AsRef<[u8]>>(&mut self, tail: T) -> Result<()> {
            let mut input: &[u8] = tail.as_ref();

            if let Some(mut incomplete) = self.incomplete.take() {
                if let Some((result, rest)) = incomplete.try_complete(input) {
                    input = rest;
                    if let Ok(text) = result {
                        self.data.push_str(text);
                    } else {
                        return Err(Error::Utf8);
                    }
                } else {
                    input = &[];
                    self.incomplete = Some(incomplete);
                }
            }

            if !input.is_empty() {
                match utf8::decode(input) {
                    Ok(text) => {
                        self.data.push_str(text);
                        Ok(())
                    }
                    Err(DecodeError::Incomplete { valid_prefix, incomplete_suffix }) => {
                        self.data.push_str(valid_prefix);
                        self.incomplete = Some(incomplete_suffix);
                        Ok(())
                    }
                    Err(DecodeError::Invalid { valid_prefix, .. }) => {
                        self.data.push_str(valid_prefix);
                        Err(Error::Utf8)
                    }
                }
            } else {
                Ok(())
            }
        }

        pub fn into_string(self) -> Result<String> {
            if self.incomplete.is_some() {
                Err(Error::Utf8)
            } else {
                Ok(self.data)
            }
        }
    }
}

use self::string_collect::StringCollector;

/// A message being accumulated from a sequence of data frames.
#[derive(Debug)]
pub(crate) struct IncompleteMessage {
    collector: IncompleteMessageCollector,
}

#[derive(Debug)]
enum IncompleteMessageCollector {
    Text(StringCollector),
    Binary(BytesMut),
}

/// The type of an incomplete message, fixed by its start frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IncompleteMessageType {
    Text,
    Binary,
}

impl IncompleteMessage {
    pub(crate) fn new(message_type: IncompleteMessageType) -> Self {
        IncompleteMessage {
            collector: match message_type {
                IncompleteMessageType::Text => {
                    IncompleteMessageCollector::Text(StringCollector::new())
                }
                IncompleteMessageType::Binary => {
                    IncompleteMessageCollector::Binary(BytesMut::new())
                }
            },
        }
    }

    /// Number of bytes accumulated so far.
    pub(crate) fn len(&self) -> usize {
        match &self.collector {
            IncompleteMessageCollector::Text(collector) => collector.len(),
            IncompleteMessageCollector::Binary(data) => data.len(),
        }
    }

    /// Add one frame's payload to the message.
    pub(crate) fn extend(&mut self, tail: &[u8]) -> Result<()> {
        match &mut self.collector {
            IncompleteMessageCollector::Text(collector) => collector.extend(tail),
            IncompleteMessageCollector::Binary(data) => {
                data.extend_from_slice(tail);
                Ok(())
            }
        }
    }

    /// Convert an incomplete message into a complete one.
    pub(crate) fn complete(self) -> Result<Message> {
        match self.collector {
            IncompleteMessageCollector::Text(collector) => {
                Ok(Message::Text(collector.into_string()?))
            }
            IncompleteMessageCollector::Binary(data) => Ok(Message::Binary(data.freeze())),
        }
    }
}

/// A decoded WebSocket message as handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A complete text message.
    Text(String),
    /// A complete binary message.
    Binary(Bytes),
    /// A ping control frame with its application data.
    Ping(Bytes),
    /// A pong control frame with its application data.
    Pong(Bytes),
    /// A close control frame with its optional code and reason.
    Close(Option<CloseFrame>),
}

impl Message {
    /// Create a new text message from a stringable.
    pub fn text<S: Into<String>>(string: S) -> Message {
        Message::Text(string.into())
    }

    /// Create a new binary message.
    pub fn binary<B: Into<Bytes>>(data: B) -> Message {
        Message::Binary(data.into())
    }

    /// Indicates whether this is a text message.
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Indicates whether this is a binary message.
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// Indicates whether this is a ping frame.
    pub fn is_ping(&self) -> bool {
        matches!(self, Message::Ping(_))
    }

    /// Indicates whether this is a pong frame.
    pub fn is_pong(&self) -> bool {
        matches!(self, Message::Pong(_))
    }

    /// Indicates whether this is a close frame.
    pub fn is_close(&self) -> bool {
        matches!(self, Message::Close(_))
    }

    /// Length of the message payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            Message::Text(string) => string.len(),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data.len(),
            Message::Close(close) => close.as_ref().map_or(0, |c| 2 + c.reason.len()),
        }
    }

    /// Whether the message payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the message into its payload bytes.
    pub fn into_data(self) -> Bytes {
        match self {
            Message::Text(string) => Bytes::from(string),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data,
            Message::Close(_) => Bytes::new(),
        }
    }

    /// View the message as text, if it is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Message::Text(string) => Some(string),
            _ => None,
        }
    }
}

impl From<String> for Message {
    fn from(string: String) -> Message {
        Message::text(string)
    }
}

impl<'s> From<&'s str> for Message {
    fn from(string: &'s str) -> Message {
        Message::text(string)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Message {
        Message::binary(data)
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Message {
        Message::binary(data)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.as_text() {
            Some(string) => write!(f, "{}", string),
            None => write!(f, "Binary Data<length={}>", self.len()),
        }
    }
}
