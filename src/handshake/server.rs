//! Upgrade-request validation and response construction.

use httparse::Status;
use log::debug;

use super::{derive_accept_key, Headers, MAX_HEADERS};
use crate::error::{ProtocolError, Result};

/// A validated client upgrade request.
///
/// Existing values of this type have passed every RFC 6455 header check
/// except the origin policy, which is the server configuration's call.
#[derive(Debug)]
pub struct UpgradeRequest {
    path: String,
    key: Vec<u8>,
    origin: Option<String>,
}

impl UpgradeRequest {
    /// Try to parse an upgrade request from the buffered bytes.
    ///
    /// Returns `Ok(None)` while the request is still incomplete; the caller
    /// should read more and try again. On success returns the number of
    /// bytes the request occupied, so the caller can hand any trailing
    /// bytes over to frame decoding.
    pub fn parse(buf: &[u8]) -> Result<Option<(usize, UpgradeRequest)>> {
        let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut header_storage);
        match request.parse(buf)? {
            Status::Partial => Ok(None),
            Status::Complete(size) => {
                let request = UpgradeRequest::from_httparse(&request)?;
                debug!("received upgrade request for {}", request.path);
                Ok(Some((size, request)))
            }
        }
    }

    fn from_httparse(raw: &httparse::Request<'_, '_>) -> Result<UpgradeRequest> {
        if raw.method.expect("Bug: no method in complete request") != "GET" {
            return Err(ProtocolError::WrongHttpMethod.into());
        }
        if raw.version.expect("Bug: no version in complete request") < 1 {
            return Err(ProtocolError::WrongHttpVersion.into());
        }
        let headers = Headers::from_httparse(raw.headers);
        if !headers.header_contains_ignore_case("Upgrade", "websocket") {
            return Err(ProtocolError::MissingUpgradeWebSocketHeader.into());
        }
        if !headers.header_contains_ignore_case("Connection", "upgrade") {
            return Err(ProtocolError::MissingConnectionUpgradeHeader.into());
        }
        if !headers.header_is_ignore_case("Sec-WebSocket-Version", "13") {
            return Err(ProtocolError::MissingSecWebSocketVersionHeader.into());
        }
        let key = headers
            .find_first("Sec-WebSocket-Key")
            .ok_or(ProtocolError::MissingSecWebSocketKey)?
            .to_vec();
        let origin = headers
            .find_first("Origin")
            .map(|raw| std::str::from_utf8(raw).map(str::to_owned))
            .transpose()?;
        Ok(UpgradeRequest {
            path: raw.path.expect("Bug: no path in complete request").to_owned(),
            key,
            origin,
        })
    }

    /// Request path of the upgrade.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The `Origin` header value, if the client sent one.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Raw bytes of the `101 Switching Protocols` response accepting this
    /// upgrade.
    pub fn accept_response(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            derive_accept_key(&self.key)
        )
        .into_bytes()
    }
}

/// Raw bytes of the response sent when a request fails validation.
pub fn rejection_response() -> Vec<u8> {
    const BODY: &str = "400 bad request: the HTTP headers do not comply with RFC 6455";
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        BODY.len(),
        BODY
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const GOOD_REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: example.com\r\n\
        Connection: Upgrade\r\n\
        Upgrade: websocket\r\n\
        Sec-WebSocket-Version: 13\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Origin: https://example.com\r\n\
        \r\n";

    #[test]
    fn parses_a_valid_request() {
        let (size, request) = UpgradeRequest::parse(GOOD_REQUEST).unwrap().unwrap();
        assert_eq!(size, GOOD_REQUEST.len());
        assert_eq!(request.path(), "/chat");
        assert_eq!(request.origin(), Some("https://example.com"));
    }

    #[test]
    fn incomplete_request_asks_for_more() {
        assert!(UpgradeRequest::parse(&GOOD_REQUEST[..30]).unwrap().is_none());
    }

    #[test]
    fn accept_response_carries_the_derived_key() {
        let (_, request) = UpgradeRequest::parse(GOOD_REQUEST).unwrap().unwrap();
        let response = String::from_utf8(request.accept_response()).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    fn parse_expecting_error(request: &str) -> Error {
        UpgradeRequest::parse(request.as_bytes()).unwrap_err()
    }

    #[test]
    fn non_get_method_is_rejected() {
        let err = parse_expecting_error(
            "POST /chat HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
        );
        assert!(matches!(err, Error::Protocol(ProtocolError::WrongHttpMethod)));
    }

    #[test]
    fn each_missing_header_has_its_own_error() {
        let err = parse_expecting_error(
            "GET / HTTP/1.1\r\nConnection: Upgrade\r\n\r\n",
        );
        assert!(matches!(err, Error::Protocol(ProtocolError::MissingUpgradeWebSocketHeader)));

        let err = parse_expecting_error(
            "GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n",
        );
        assert!(matches!(err, Error::Protocol(ProtocolError::MissingConnectionUpgradeHeader)));

        let err = parse_expecting_error(
            "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
        );
        assert!(matches!(err, Error::Protocol(ProtocolError::MissingSecWebSocketVersionHeader)));

        let err = parse_expecting_error(
            "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n",
        );
        assert!(matches!(err, Error::Protocol(ProtocolError::MissingSecWebSocketKey)));
    }

    #[test]
    fn rejection_response_is_well_formed() {
        let response = String::from_utf8(rejection_response()).unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        assert!(response.contains(&format!("Content-Length: {}\r\n", body.len())));
    }
}
