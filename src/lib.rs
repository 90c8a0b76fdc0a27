//! Server-side WebSocket framing for chunked byte streams.
//!
//! This crate takes a byte stream whose opening handshake it performs and
//! decodes the RFC 6455 framing layer into application messages. The
//! decoding core is incremental: bytes are consumed in whatever segments
//! the transport delivers them, a frame header split across reads resumes
//! where it stopped, and fragmented messages are reassembled up to a
//! configurable size limit.
//!
//! [`accept`] runs the handshake over any `Read + Write` stream (wrap the
//! stream in TLS first if you need `wss`) and yields a [`Connection`] for
//! reading and writing messages. The sans-IO core, [`Session`], can be
//! driven directly when the transport is not a blocking stream: feed it
//! byte segments as they arrive and poll it for completed messages.
#![deny(
    missing_docs,
    missing_copy_implementations,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_must_use,
    unused_mut,
    unused_imports,
    unused_import_braces
)]

pub mod buffer;
pub mod error;
#[cfg(feature = "handshake")]
pub mod handshake;
pub mod protocol;
#[cfg(feature = "handshake")]
mod server;
pub mod util;

pub use crate::error::{Error, Result};
pub use crate::protocol::frame::CloseFrame;
pub use crate::protocol::{Connection, Message, Session, SessionConfig};
#[cfg(feature = "handshake")]
pub use crate::server::{accept, accept_with_config, ServerConfig};
