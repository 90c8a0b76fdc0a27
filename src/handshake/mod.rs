//! Server side of the RFC 6455 opening handshake.

pub mod server;

use data_encoding::BASE64;
use sha1::{Digest, Sha1};

/// Limit on the number of header lines in an upgrade request.
pub(crate) const MAX_HEADERS: usize = 124;

/// Derive the `Sec-WebSocket-Accept` value for a client key.
pub fn derive_accept_key(client_key: &[u8]) -> String {
    // ... the value is constructed by concatenating /key/ with the string
    // "258EAFA5-E914-47DA-95CA-C5AB0DC85B11" (RFC 6455)
    const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut sha1 = Sha1::default();
    sha1.update(client_key);
    sha1.update(WS_GUID);
    BASE64.encode(&sha1.finalize())
}

/// HTTP headers of an upgrade request, in request order.
#[derive(Debug)]
pub struct Headers {
    data: Vec<(String, Vec<u8>)>,
}

impl Headers {
    pub(crate) fn from_httparse(raw: &[httparse::Header<'_>]) -> Headers {
        Headers {
            data: raw.iter().map(|h| (h.name.to_owned(), h.value.to_vec())).collect(),
        }
    }

    /// Get the first header with the given name, if any.
    pub fn find_first(&self, name: &str) -> Option<&[u8]> {
        self.data
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Check if the given header has the given value, ignoring case.
    pub fn header_is_ignore_case(&self, name: &str, value: &str) -> bool {
        self.find_first(name)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .map_or(false, |val| val.eq_ignore_ascii_case(value))
    }

    /// Check if the given header contains the given token in its
    /// comma-separated value list, ignoring case.
    ///
    /// Browsers send things like `Connection: keep-alive, Upgrade`, so an
    /// equality check is not enough.
    pub fn header_contains_ignore_case(&self, name: &str, token: &str) -> bool {
        self.find_first(name)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .map_or(false, |val| {
                val.split(',').any(|part| part.trim().eq_ignore_ascii_case(token))
            })
    }
}
