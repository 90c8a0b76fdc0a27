//! Methods to accept an incoming WebSocket connection on a server.

use std::env;
use std::io::{Read, Write};

use log::{debug, warn};

use crate::error::{CapacityError, ProtocolError, Result};
use crate::handshake::server::{rejection_response, UpgradeRequest};
use crate::protocol::{Connection, SessionConfig, READ_CHUNK_SIZE};

/// Hard cap on the buffered upgrade request.
const MAX_REQUEST_SIZE: usize = 16 * 1024;

/// Operator-facing server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port the operator is expected to bind. Informational for this
    /// crate; binding and TLS are the caller's concern.
    pub port: u16,
    /// Origin values allowed to connect. `None` allows any origin.
    pub allowed_origins: Option<Vec<String>>,
    /// Whether requests without an `Origin` header pass the allowlist.
    /// Non-browser clients typically send none.
    pub allow_missing_origin: bool,
    /// Per-connection decode configuration.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 4430,
            allowed_origins: None,
            allow_missing_origin: true,
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Default configuration with overrides read from the environment.
    ///
    /// `PORT` overrides the port when set to something parseable.
    pub fn from_env() -> Self {
        let mut config = ServerConfig::default();
        if let Ok(raw) = env::var("PORT") {
            match raw.parse() {
                Ok(port) => config.port = port,
                Err(_) => warn!("ignoring unparseable PORT value {:?}", raw),
            }
        }
        config
    }

    /// Check an `Origin` header value against the configured policy.
    pub fn is_origin_allowed(&self, origin: Option<&str>) -> bool {
        match (&self.allowed_origins, origin) {
            (None, _) => true,
            (Some(_), None) => self.allow_missing_origin,
            (Some(list), Some(origin)) => list.iter().any(|allowed| allowed == origin),
        }
    }
}

/// Accept the given stream as a WebSocket with the default configuration.
///
/// This performs the opening handshake on the stream and hands back a
/// [`Connection`] once the `101 Switching Protocols` response went out.
/// Any `Read + Write` stream is supported; for TLS, pass a stream that
/// already speaks TLS (e.g. from `native-tls` or `rustls`).
pub fn accept<Stream: Read + Write>(stream: Stream) -> Result<Connection<Stream>> {
    accept_with_config(stream, &ServerConfig::default())
}

/// Accept the given stream as a WebSocket with an explicit configuration.
///
/// On any validation failure a `400 Bad Request` is written to the stream
/// before the error is returned, and the stream should then be dropped.
pub fn accept_with_config<Stream: Read + Write>(
    mut stream: Stream,
    config: &ServerConfig,
) -> Result<Connection<Stream>> {
    let mut request_buffer = Vec::with_capacity(READ_CHUNK_SIZE);
    let (consumed, request) = loop {
        let mut chunk = [0; READ_CHUNK_SIZE];
        let size = stream.read(&mut chunk)?;
        if size == 0 {
            return Err(ProtocolError::HandshakeIncomplete.into());
        }
        request_buffer.extend_from_slice(&chunk[..size]);

        match UpgradeRequest::parse(&request_buffer) {
            Ok(Some(parsed)) => break parsed,
            Ok(None) => {
                if request_buffer.len() > MAX_REQUEST_SIZE {
                    reject(&mut stream)?;
                    return Err(CapacityError::HeaderTooLong.into());
                }
            }
            Err(err) => {
                reject(&mut stream)?;
                return Err(err);
            }
        }
    };

    if !config.is_origin_allowed(request.origin()) {
        debug!("rejecting origin {:?}", request.origin());
        reject(&mut stream)?;
        return Err(ProtocolError::ForbiddenOrigin.into());
    }

    debug!("accepting upgrade for {}", request.path());
    stream.write_all(&request.accept_response())?;
    stream.flush()?;

    // Frame bytes may have arrived on the heels of the request.
    let leftover = request_buffer.split_off(consumed);
    Ok(Connection::from_partially_read(stream, leftover, config.session))
}

fn reject<Stream: Write>(stream: &mut Stream) -> Result<()> {
    stream.write_all(&rejection_response())?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_comes_from_the_environment() {
        env::set_var("PORT", "8081");
        assert_eq!(ServerConfig::from_env().port, 8081);
        env::set_var("PORT", "not-a-port");
        assert_eq!(ServerConfig::from_env().port, 4430);
        env::remove_var("PORT");
        assert_eq!(ServerConfig::from_env().port, 4430);
    }

    #[test]
    fn origin_policy() {
        let mut config = ServerConfig::default();
        assert!(config.is_origin_allowed(Some("https://anywhere.example")));
        assert!(config.is_origin_allowed(None));

        config.allowed_origins = Some(vec!["https://localhost:5500".into()]);
        assert!(config.is_origin_allowed(Some("https://localhost:5500")));
        assert!(!config.is_origin_allowed(Some("https://evil.example")));
        assert!(config.is_origin_allowed(None));

        config.allow_missing_origin = false;
        assert!(!config.is_origin_allowed(None));
    }
}
