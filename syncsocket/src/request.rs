//! Request builder and the blocking execute path
//!
//! A [`Request`] describes one conversation. Each `execute*` call opens its
//! own client and connection, sends the payload once the connection is
//! open, waits for the conversation to complete and closes it again.

use crate::bridge::{ConversationBridge, Decoder, Predicate};
use crate::query::append_query;
use crate::response::Response;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use syncsocket_client::{ClientConfig, Session, WebSocketClient};
use syncsocket_core::error::TimeoutError;
use syncsocket_core::{Error, Result};

/// Timeout in seconds used when none, or a non-positive one, is given
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Map a timeout in seconds to the one actually used
pub fn normalize_timeout(seconds: i64) -> u64 {
    if seconds <= 0 {
        DEFAULT_TIMEOUT_SECS
    } else {
        seconds as u64
    }
}

/// Description of one request/response conversation
///
/// ```rust,no_run
/// use syncsocket::Request;
///
/// # fn main() -> syncsocket::Result<()> {
/// let response = Request::new("ws://127.0.0.1:9001/echo")
///     .query_with(|q| {
///         q.insert("lang".into(), "en".into());
///     })
///     .body("hello")
///     .timeout(10)
///     .execute_until(|text| text.contains("hello"))?;
/// println!("{:?} {}", response.text(), response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    url: String,
    body: Option<String>,
    bytes: Bytes,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    timeout: u64,
    config: ClientConfig,
}

impl Request {
    /// A request to `url` (`ws://host[:port]/path`)
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: None,
            bytes: Bytes::new(),
            headers: HashMap::new(),
            query: HashMap::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            config: ClientConfig::default(),
        }
    }

    /// Text payload, sent even when empty; ignored when a non-empty binary
    /// payload is set
    pub fn body(mut self, text: impl Into<String>) -> Self {
        self.body = Some(text.into());
        self
    }

    /// Binary payload
    pub fn bytes(mut self, data: impl Into<Bytes>) -> Self {
        self.bytes = data.into();
        self
    }

    /// Headers for the upgrade request, replacing any set before
    pub fn headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// Edit the upgrade request headers in place
    pub fn headers_with(mut self, edit: impl FnOnce(&mut HashMap<String, String>)) -> Self {
        edit(&mut self.headers);
        self
    }

    /// Query parameters, replacing any set before
    pub fn query(mut self, query: HashMap<String, String>) -> Self {
        self.query = query;
        self
    }

    /// Edit the query parameters in place
    pub fn query_with(mut self, edit: impl FnOnce(&mut HashMap<String, String>)) -> Self {
        edit(&mut self.query);
        self
    }

    /// Timeout in seconds for opening and, separately, for completing
    ///
    /// Values of zero or less select [`DEFAULT_TIMEOUT_SECS`]. Unless the
    /// [`ClientConfig`] sets its own handshake timeout, this one also bounds
    /// the opening handshake.
    pub fn timeout(mut self, seconds: i64) -> Self {
        self.timeout = normalize_timeout(seconds);
        self
    }

    /// Transport settings
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Target address, without the query parameters
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The text payload, empty when unset
    pub fn text_payload(&self) -> &str {
        self.body.as_deref().unwrap_or_default()
    }

    /// The binary payload, empty when unset
    pub fn binary_payload(&self) -> &[u8] {
        &self.bytes
    }

    /// Upgrade request headers
    pub fn header_map(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Query parameters
    pub fn query_map(&self) -> &HashMap<String, String> {
        &self.query
    }

    /// Effective timeout in seconds
    pub fn timeout_secs(&self) -> u64 {
        self.timeout
    }

    /// Address with the query parameters appended
    pub fn target(&self) -> String {
        append_query(&self.url, &self.query)
    }

    /// Run the conversation; the first message completes it
    pub fn execute(&self) -> Result<Response> {
        self.run(None, None)
    }

    /// Run the conversation until `predicate` accepts a message
    ///
    /// Binary messages reach the predicate as lossily decoded UTF-8.
    pub fn execute_until<P>(&self, predicate: P) -> Result<Response>
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.run(Some(Box::new(predicate)), None)
    }

    /// Run the conversation until `predicate` accepts a message, decoding
    /// binary messages with `decoder`
    pub fn execute_until_with<P, D>(&self, predicate: P, decoder: D) -> Result<Response>
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
        D: Fn(&[u8]) -> String + Send + Sync + 'static,
    {
        self.run(Some(Box::new(predicate)), Some(Box::new(decoder)))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(url = %self.url, timeout = self.timeout))]
    fn run(&self, predicate: Option<Predicate>, decoder: Option<Decoder>) -> Result<Response> {
        let target = self.target();
        let timeout = Duration::from_secs(self.timeout);
        let bridge = Arc::new(ConversationBridge::new(predicate, decoder));

        let client = WebSocketClient::new(self.client_config(timeout))?;
        client.connect(&target, &self.headers, bridge.clone())?;

        if !bridge.wait_open(timeout) {
            tracing::debug!("connection did not open in time");
            client.abort();
            return Err(Error::Timeout(TimeoutError::Open { timeout }));
        }
        if let Some(failure) = bridge.take_failure() {
            tracing::debug!(error = %failure, "connection failed");
            client.abort();
            return Err(failure);
        }
        let Some(session) = bridge.session() else {
            client.abort();
            return Err(Error::Connection(
                "connection closed before it opened".to_string(),
            ));
        };

        if let Err(e) = self.send_payload(&session) {
            tracing::debug!(error = %e, "sending the payload failed");
            bridge.close();
            client.abort();
            return Err(e);
        }

        if bridge.wait_complete(timeout) {
            bridge.close();
            // Let the closing handshake finish so the status is recorded
            client.stop();
            let response = bridge.snapshot();
            tracing::debug!(status = response.status(), "conversation finished");
            Ok(response)
        } else {
            tracing::debug!("conversation did not complete in time");
            let response = bridge.snapshot();
            bridge.close();
            client.abort();
            Ok(response)
        }
    }

    fn client_config(&self, timeout: Duration) -> ClientConfig {
        let config = self.config.clone();
        match config.handshake_timeout {
            Some(_) => config,
            None => config.handshake_timeout(timeout),
        }
    }

    fn send_payload(&self, session: &Session) -> Result<()> {
        if !self.bytes.is_empty() {
            session.send_binary(self.bytes.clone())
        } else if let Some(text) = &self.body {
            session.send_text(text.clone())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use syncsocket_core::Message;
    use tracing_test::traced_test;

    #[test]
    fn test_defaults() {
        let request = Request::new("ws://127.0.0.1:1/");
        assert_eq!(request.url(), "ws://127.0.0.1:1/");
        assert_eq!(request.text_payload(), "");
        assert!(request.binary_payload().is_empty());
        assert!(request.header_map().is_empty());
        assert!(request.query_map().is_empty());
        assert_eq!(request.timeout_secs(), DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_builder() {
        let request = Request::new("ws://h/p")
            .body("text")
            .bytes(&b"raw"[..])
            .headers_with(|h| {
                h.insert("X-Token".into(), "abc".into());
            })
            .query_with(|q| {
                q.insert("a".into(), "1".into());
            })
            .timeout(5);

        assert_eq!(request.text_payload(), "text");
        assert_eq!(request.binary_payload(), b"raw");
        assert_eq!(request.header_map()["X-Token"], "abc");
        assert_eq!(request.target(), "ws://h/p?a=1");
        assert_eq!(request.timeout_secs(), 5);
    }

    #[test]
    fn test_setting_a_map_replaces_it() {
        let mut headers = HashMap::new();
        headers.insert("X-B".to_string(), "2".to_string());
        let request = Request::new("ws://h/")
            .headers_with(|h| {
                h.insert("X-A".into(), "1".into());
            })
            .headers(headers);
        assert!(!request.header_map().contains_key("X-A"));
        assert_eq!(request.header_map()["X-B"], "2");
    }

    #[test]
    fn test_binary_payload_wins() {
        let (session, sink) = Session::mock();
        Request::new("ws://h/")
            .body("text")
            .bytes(&b"raw"[..])
            .send_payload(&session)
            .unwrap();
        assert_eq!(sink.sent(), vec![Message::binary(&b"raw"[..])]);
    }

    #[test]
    fn test_empty_binary_falls_back_to_text() {
        let (session, sink) = Session::mock();
        Request::new("ws://h/")
            .body("text")
            .bytes(Bytes::new())
            .send_payload(&session)
            .unwrap();
        assert_eq!(sink.sent(), vec![Message::text("text")]);
    }

    #[test]
    fn test_no_payload_sends_nothing() {
        let (session, sink) = Session::mock();
        Request::new("ws://h/").send_payload(&session).unwrap();
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn test_empty_body_is_still_sent() {
        let (session, sink) = Session::mock();
        let request = Request::new("ws://h/").body("");
        assert_eq!(request.text_payload(), "");
        request.send_payload(&session).unwrap();
        assert_eq!(sink.sent(), vec![Message::text("")]);
    }

    #[test]
    fn test_request_timeout_bounds_handshake() {
        let request = Request::new("ws://h/").timeout(30);
        let config = request.client_config(Duration::from_secs(request.timeout_secs()));
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(30)));

        // An explicit handshake timeout is kept
        let request = request.config(ClientConfig::default().handshake_timeout(Duration::from_secs(3)));
        let config = request.client_config(Duration::from_secs(30));
        assert_eq!(config.handshake_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_send_failure_is_returned() {
        let (session, sink) = Session::mock();
        sink.fail_sends(true);
        assert!(Request::new("ws://h/")
            .body("text")
            .send_payload(&session)
            .is_err());
    }

    #[test]
    fn test_bad_address_fails_before_connecting() {
        let err = Request::new("not a url").execute().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));

        let err = Request::new("wss://example.com/").execute().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_invalid_config_fails() {
        let err = Request::new("ws://127.0.0.1:1/")
            .config(ClientConfig::default().worker_threads(0))
            .execute()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    #[traced_test]
    fn test_refused_connection_is_returned_and_logged() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Request::new(format!("ws://{}/", addr))
            .body("hello")
            .timeout(5)
            .execute()
            .unwrap_err();
        assert!(!err.is_timeout(), "{}", err);
        assert!(logs_contain("connection failed"));
    }

    proptest! {
        #[test]
        fn non_positive_timeouts_use_default(seconds in i64::MIN..=0) {
            prop_assert_eq!(normalize_timeout(seconds), DEFAULT_TIMEOUT_SECS);
            prop_assert_eq!(Request::new("ws://h/").timeout(seconds).timeout_secs(), 60);
        }

        #[test]
        fn positive_timeouts_are_kept(seconds in 1i64..=i64::MAX) {
            prop_assert_eq!(normalize_timeout(seconds), seconds as u64);
        }
    }
}
