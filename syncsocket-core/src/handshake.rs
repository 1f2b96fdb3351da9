//! WebSocket handshake implementation
//!
//! This module provides the opening handshake as defined in RFC 6455, for
//! both the client side (building the upgrade request, validating the
//! server's answer) and the server side (parsing and answering an upgrade
//! request). Raw HTTP is parsed with `httparse`; target addresses and
//! header names are validated with `http`.

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::http::*;
use crate::protocol::keys;
use http::header::{HeaderName, HeaderValue};
use http::Uri;
use std::collections::HashMap;

const MAX_HEADERS: usize = 64;

/// A parsed `ws://` target address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTarget {
    host: String,
    port: u16,
    explicit_port: bool,
    resource: String,
}

impl ClientTarget {
    /// Parse a `ws://host[:port][/path][?query]` address
    pub fn parse(url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e: http::uri::InvalidUri| ProtocolError::InvalidUrl(format!("{}: {}", url, e)))?;

        match uri.scheme_str() {
            Some(scheme) if scheme.eq_ignore_ascii_case("ws") => {}
            Some(scheme) => return Err(ProtocolError::UnsupportedScheme(scheme.to_string()).into()),
            None => return Err(ProtocolError::InvalidUrl(format!("{}: missing scheme", url)).into()),
        }

        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProtocolError::InvalidUrl(format!("{}: missing host", url)))?
            .to_string();

        let resource = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| !pq.is_empty())
            .unwrap_or("/");
        let resource = if resource.starts_with('/') {
            resource.to_string()
        } else {
            format!("/{}", resource)
        };

        Ok(Self {
            host,
            port: uri.port_u16().unwrap_or(DEFAULT_WS_PORT),
            explicit_port: uri.port_u16().is_some(),
            resource,
        })
    }

    /// Host name or address literal
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port, defaulting to 80
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path and query sent in the request line
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// `host:port` suitable for a socket connect
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host.trim_matches(|c| c == '[' || c == ']'), self.port)
    }

    /// Value of the `Host` header
    pub fn host_header(&self) -> String {
        if self.explicit_port {
            format!("{}:{}", self.host, self.port)
        } else {
            self.host.clone()
        }
    }
}

/// WebSocket handshake request information
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// HTTP method (should be GET)
    pub method: String,
    /// Request target (path and query)
    pub uri: String,
    /// HTTP headers, keyed by lowercase name
    pub headers: HashMap<String, String>,
}

impl HandshakeRequest {
    /// Look up a header case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The `Sec-WebSocket-Key` offered by the client
    pub fn key(&self) -> Option<&str> {
        self.header(SEC_WEBSOCKET_KEY)
    }
}

/// WebSocket handshake response information
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    /// HTTP status code
    pub status: u16,
    /// HTTP status message
    pub status_message: String,
    /// HTTP headers, keyed by lowercase name
    pub headers: HashMap<String, String>,
}

impl HandshakeResponse {
    /// Look up a header case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// A plain HTTP refusal of an upgrade request
    pub fn reject(status: u16, status_message: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-length".to_string(), "0".to_string());
        headers.insert(CONNECTION.to_string(), "close".to_string());
        Self {
            status,
            status_message: status_message.to_string(),
            headers,
        }
    }
}

/// WebSocket handshake configuration
#[derive(Debug, Clone, Default)]
pub struct HandshakeConfig {
    /// `User-Agent` (client) or `Server` (server) header value
    pub agent: Option<String>,
    /// Additional headers
    pub extra_headers: HashMap<String, String>,
}

/// Compute WebSocket accept key from client key
pub fn compute_accept_key(client_key: &str) -> String {
    keys::accept_for(client_key)
}

/// Create a client handshake request
///
/// Extra headers may override `Host` and `User-Agent` but never the
/// upgrade headers themselves.
pub fn create_client_handshake(
    target: &ClientTarget,
    config: &HandshakeConfig,
) -> Result<HandshakeRequest> {
    let mut headers = HashMap::new();

    headers.insert(HOST.to_string(), target.host_header());
    if let Some(agent) = &config.agent {
        headers.insert(USER_AGENT.to_string(), agent.clone());
    }

    for (key, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| ProtocolError::InvalidHeader {
            header: key.clone(),
            value: value.clone(),
        })?;
        HeaderValue::from_str(value).map_err(|_| ProtocolError::InvalidHeader {
            header: key.clone(),
            value: value.clone(),
        })?;
        headers.insert(name.as_str().to_string(), value.clone());
    }

    headers.insert(UPGRADE.to_string(), WEBSOCKET_TOKEN.to_string());
    headers.insert(CONNECTION.to_string(), UPGRADE_TOKEN.to_string());
    headers.insert(SEC_WEBSOCKET_KEY.to_string(), keys::generate());
    headers.insert(SEC_WEBSOCKET_VERSION.to_string(), WEBSOCKET_VERSION.to_string());

    Ok(HandshakeRequest {
        method: "GET".to_string(),
        uri: target.resource().to_string(),
        headers,
    })
}

/// Parse a client handshake request from the front of `buf`
///
/// Returns `None` while the header block is incomplete, otherwise the
/// request and the number of bytes it occupied.
pub fn parse_client_handshake(buf: &[u8]) -> Result<Option<(HandshakeRequest, usize)>> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw_headers);

    let consumed = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ProtocolError::InvalidFormat(e.to_string()).into()),
    };

    let method = req.method.unwrap_or_default().to_string();
    if method != "GET" {
        return Err(ProtocolError::InvalidMethod(method).into());
    }

    Ok(Some((
        HandshakeRequest {
            method,
            uri: req.path.unwrap_or("/").to_string(),
            headers: collect_headers(req.headers),
        },
        consumed,
    )))
}

/// Validate a client handshake request
pub fn validate_client_handshake(request: &HandshakeRequest) -> Result<()> {
    let upgrade = required(request.header(UPGRADE), UPGRADE)?;
    if !upgrade.eq_ignore_ascii_case(WEBSOCKET_TOKEN) {
        return Err(invalid(UPGRADE, upgrade));
    }

    let connection = required(request.header(CONNECTION), CONNECTION)?;
    if !has_token(connection, "upgrade") {
        return Err(invalid(CONNECTION, connection));
    }

    let key = required(request.key(), SEC_WEBSOCKET_KEY)?;
    if !keys::is_valid(key) {
        return Err(invalid(SEC_WEBSOCKET_KEY, key));
    }

    let version = required(request.header(SEC_WEBSOCKET_VERSION), SEC_WEBSOCKET_VERSION)?;
    if !keys::is_supported_version(version) {
        return Err(invalid(SEC_WEBSOCKET_VERSION, version));
    }

    Ok(())
}

/// Create a server handshake response
pub fn create_server_handshake(
    request: &HandshakeRequest,
    config: &HandshakeConfig,
) -> Result<HandshakeResponse> {
    let client_key = required(request.key(), SEC_WEBSOCKET_KEY)?;

    let mut headers = HashMap::new();
    for (key, value) in &config.extra_headers {
        headers.insert(key.to_ascii_lowercase(), value.clone());
    }
    if let Some(agent) = &config.agent {
        headers.insert(SERVER.to_string(), agent.clone());
    }
    headers.insert(UPGRADE.to_string(), WEBSOCKET_TOKEN.to_string());
    headers.insert(CONNECTION.to_string(), UPGRADE_TOKEN.to_string());
    headers.insert(
        SEC_WEBSOCKET_ACCEPT.to_string(),
        compute_accept_key(client_key),
    );

    Ok(HandshakeResponse {
        status: SWITCHING_PROTOCOLS,
        status_message: "Switching Protocols".to_string(),
        headers,
    })
}

/// Parse a server handshake response from the front of `buf`
///
/// Returns `None` while the header block is incomplete.
pub fn parse_server_handshake(buf: &[u8]) -> Result<Option<(HandshakeResponse, usize)>> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut raw_headers);

    let consumed = match res.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ProtocolError::InvalidFormat(e.to_string()).into()),
    };

    Ok(Some((
        HandshakeResponse {
            status: res.code.unwrap_or_default(),
            status_message: res.reason.unwrap_or_default().to_string(),
            headers: collect_headers(res.headers),
        },
        consumed,
    )))
}

/// Validate a server handshake response
pub fn validate_server_handshake(response: &HandshakeResponse, client_key: &str) -> Result<()> {
    if response.status != SWITCHING_PROTOCOLS {
        return Err(ProtocolError::UnexpectedStatus(response.status).into());
    }

    let upgrade = required(response.header(UPGRADE), UPGRADE)?;
    if !upgrade.eq_ignore_ascii_case(WEBSOCKET_TOKEN) {
        return Err(invalid(UPGRADE, upgrade));
    }

    let connection = required(response.header(CONNECTION), CONNECTION)?;
    if !has_token(connection, "upgrade") {
        return Err(invalid(CONNECTION, connection));
    }

    let accept = required(response.header(SEC_WEBSOCKET_ACCEPT), SEC_WEBSOCKET_ACCEPT)?;
    let expected = compute_accept_key(client_key);
    if accept != expected {
        return Err(ProtocolError::InvalidAcceptKey {
            expected,
            received: accept.to_string(),
        }
        .into());
    }

    Ok(())
}

/// Convert handshake request to HTTP string
pub fn request_to_string(request: &HandshakeRequest) -> String {
    let mut out = format!("{} {} HTTP/1.1\r\n", request.method, request.uri);
    for (key, value) in &request.headers {
        out.push_str(&format!("{}: {}\r\n", key, value));
    }
    out.push_str("\r\n");
    out
}

/// Convert handshake response to HTTP string
pub fn response_to_string(response: &HandshakeResponse) -> String {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\n",
        response.status, response.status_message
    );
    for (key, value) in &response.headers {
        out.push_str(&format!("{}: {}\r\n", key, value));
    }
    out.push_str("\r\n");
    out
}

/// Status used when an upgrade request is malformed
pub fn bad_request() -> HandshakeResponse {
    HandshakeResponse::reject(BAD_REQUEST, "Bad Request")
}

/// Status used when the server is at capacity
pub fn service_unavailable() -> HandshakeResponse {
    HandshakeResponse::reject(SERVICE_UNAVAILABLE, "Service Unavailable")
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> HashMap<String, String> {
    raw.iter()
        .filter(|h| !h.name.is_empty())
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect()
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    value.ok_or_else(|| ProtocolError::MissingHeader(name.to_string()).into())
}

fn invalid(header: &str, value: &str) -> Error {
    ProtocolError::InvalidHeader {
        header: header.to_string(),
        value: value.to_string(),
    }
    .into()
}
