//! Blocking view of one callback-driven conversation
//!
//! The client reports connection events on its worker threads; the caller
//! waits on two gates. The open gate is released by the first open, by a
//! close or by a failure; the complete gate by the first message the
//! predicate accepts or by a close. Every release and every write to the
//! response is idempotent, so events may race the caller freely.

use crate::gate::Gate;
use crate::response::Response;
use parking_lot::Mutex;
use std::time::Duration;
use syncsocket_client::{Session, SessionListener};
use syncsocket_core::{CloseCode, Error, Frame};

/// Decides whether a message ends the conversation
pub(crate) type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Turns a binary payload into text
pub(crate) type Decoder = Box<dyn Fn(&[u8]) -> String + Send + Sync>;

/// Close status sent when the caller ends the conversation
pub(crate) const CLOSE_CODE: CloseCode = CloseCode::Normal;

/// Close reason sent when the caller ends the conversation
pub(crate) const CLOSE_REASON: &str = "closed session.";

pub(crate) fn lossy_utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Lifecycle of a conversation
///
/// States only move forward; `Completing` and `Closing` may be skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ConversationState {
    Connecting,
    Open,
    Completing,
    Closing,
    Closed,
}

#[derive(Debug)]
struct Inner {
    state: ConversationState,
    session: Option<Session>,
    response: Response,
    failure: Option<Error>,
}

impl Inner {
    fn advance(&mut self, next: ConversationState) {
        if next > self.state {
            self.state = next;
        }
    }
}

/// Listener that turns connection events into gate releases
pub(crate) struct ConversationBridge {
    inner: Mutex<Inner>,
    opened: Gate,
    completed: Gate,
    predicate: Option<Predicate>,
    decoder: Decoder,
}

impl std::fmt::Debug for ConversationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationBridge")
            .field("inner", &self.inner)
            .field("opened", &self.opened)
            .field("completed", &self.completed)
            .field("predicate", &self.predicate.is_some())
            .finish_non_exhaustive()
    }
}

impl ConversationBridge {
    pub(crate) fn new(predicate: Option<Predicate>, decoder: Option<Decoder>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ConversationState::Connecting,
                session: None,
                response: Response::new(),
                failure: None,
            }),
            opened: Gate::new(),
            completed: Gate::new(),
            predicate,
            decoder: decoder.unwrap_or_else(|| Box::new(lossy_utf8)),
        }
    }

    pub(crate) fn state(&self) -> ConversationState {
        self.inner.lock().state
    }

    /// Wait for the open gate; false on timeout
    pub(crate) fn wait_open(&self, timeout: Duration) -> bool {
        self.opened.wait(timeout)
    }

    /// Wait for the complete gate; false on timeout
    pub(crate) fn wait_complete(&self, timeout: Duration) -> bool {
        self.completed.wait(timeout)
    }

    /// The session, once the connection opened
    pub(crate) fn session(&self) -> Option<Session> {
        self.inner.lock().session.clone()
    }

    /// A failure reported before the connection opened
    pub(crate) fn take_failure(&self) -> Option<Error> {
        self.inner.lock().failure.take()
    }

    /// Copy of the response as it stands
    pub(crate) fn snapshot(&self) -> Response {
        self.inner.lock().response.clone()
    }

    /// Ask the peer to close, unless closing already started
    pub(crate) fn close(&self) {
        let session = {
            let mut inner = self.inner.lock();
            if inner.state >= ConversationState::Closing {
                return;
            }
            let Some(session) = inner.session.clone() else {
                return;
            };
            inner.advance(ConversationState::Closing);
            session
        };
        tracing::debug!(id = session.id(), "closing conversation");
        session.close(CLOSE_CODE.code(), CLOSE_REASON);
    }

    fn on_message(&self, text: &str) {
        let done = self.predicate.as_ref().map_or(true, |accepts| accepts(text));
        if !done {
            tracing::trace!("message did not complete the conversation");
            return;
        }
        self.inner.lock().advance(ConversationState::Completing);
        if self.completed.release() {
            tracing::debug!("conversation complete");
        }
    }
}

impl SessionListener for ConversationBridge {
    fn on_open(&self, session: Session) {
        {
            let mut inner = self.inner.lock();
            if inner.state != ConversationState::Connecting {
                tracing::debug!(state = ?inner.state, "ignoring late open");
                return;
            }
            inner.session = Some(session);
            inner.state = ConversationState::Open;
        }
        self.opened.release();
    }

    fn on_frame(&self, frame: &Frame) {
        if frame.is_data() {
            self.inner.lock().response.record_frame(frame.payload.clone());
        }
    }

    fn on_text(&self, text: &str) {
        self.on_message(text);
    }

    fn on_binary(&self, data: &[u8]) {
        let text = (self.decoder)(data);
        self.on_message(&text);
    }

    fn on_close(&self, code: u16, reason: &str, remote: bool) {
        {
            let mut inner = self.inner.lock();
            if inner.response.record_close(code) {
                tracing::debug!(code, reason, remote, "conversation closed");
            }
            inner.state = ConversationState::Closed;
        }
        self.opened.release();
        self.completed.release();
    }

    fn on_error(&self, error: &Error) {
        // After open the connection task reports on_close right after this,
        // so the status lands only once the caller's `stop` joins the task.
        {
            let mut inner = self.inner.lock();
            if inner.state == ConversationState::Connecting && inner.failure.is_none() {
                inner.failure = Some(error.clone());
                inner.state = ConversationState::Closed;
            }
        }
        tracing::debug!(error = %error, "transport error");
        self.opened.release();
        self.completed.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn bridge() -> ConversationBridge {
        ConversationBridge::new(None, None)
    }

    #[test]
    fn test_open_releases_open_gate_once() {
        let bridge = bridge();
        let (session, _sink) = Session::mock();
        assert!(!bridge.wait_open(Duration::from_millis(10)));

        bridge.on_open(session.clone());
        assert!(bridge.wait_open(Duration::ZERO));
        assert_eq!(bridge.state(), ConversationState::Open);
        assert!(!bridge.wait_complete(Duration::from_millis(10)));

        // A duplicate open changes nothing
        bridge.on_open(session);
        assert_eq!(bridge.state(), ConversationState::Open);
    }

    #[test]
    fn test_first_message_completes_without_predicate() {
        let bridge = bridge();
        let (session, _sink) = Session::mock();
        bridge.on_open(session);

        bridge.on_frame(&Frame::text("anything"));
        bridge.on_text("anything");
        assert!(bridge.wait_complete(Duration::ZERO));
        assert_eq!(bridge.state(), ConversationState::Completing);
        assert_eq!(bridge.snapshot().text().as_deref(), Some("anything"));
    }

    #[test]
    fn test_predicate_gates_completion() {
        let bridge = ConversationBridge::new(Some(Box::new(|text: &str| text.contains("嘻嘻"))), None);
        let (session, _sink) = Session::mock();
        bridge.on_open(session);

        bridge.on_binary("哈哈".as_bytes());
        assert!(!bridge.wait_complete(Duration::from_millis(10)));

        bridge.on_binary("嘻嘻".as_bytes());
        assert!(bridge.wait_complete(Duration::ZERO));
    }

    #[test]
    fn test_decoder_feeds_predicate() {
        let decoder: Decoder = Box::new(|bytes: &[u8]| bytes.iter().map(|b| format!("{:02x}", b)).collect());
        let bridge = ConversationBridge::new(Some(Box::new(|text: &str| text == "0102")), Some(decoder));
        let (session, _sink) = Session::mock();
        bridge.on_open(session);

        bridge.on_binary(&[1, 2]);
        assert!(bridge.wait_complete(Duration::ZERO));
    }

    #[test]
    fn test_only_data_frames_are_recorded() {
        let bridge = bridge();
        bridge.on_frame(&Frame::binary(&b"payload"[..]));
        bridge.on_frame(&Frame::ping(&b"ping"[..]));

        let response = bridge.snapshot();
        assert_eq!(response.bytes(), Some(&b"payload"[..]));
        assert!(response.end_time().is_some());
    }

    #[test]
    fn test_last_frame_wins_over_completing_one() {
        let bridge = ConversationBridge::new(Some(Box::new(|text: &str| text == "first")), None);
        let (session, _sink) = Session::mock();
        bridge.on_open(session);

        bridge.on_frame(&Frame::text("first"));
        bridge.on_text("first");
        bridge.on_frame(&Frame::text("second"));
        bridge.on_text("second");

        assert!(bridge.wait_complete(Duration::ZERO));
        assert_eq!(bridge.snapshot().text().as_deref(), Some("second"));
    }

    #[test]
    fn test_close_before_open_releases_both_gates() {
        let bridge = bridge();
        bridge.on_close(CloseCode::Abnormal.code(), "", true);

        assert!(bridge.wait_open(Duration::ZERO));
        assert!(bridge.wait_complete(Duration::ZERO));
        assert_eq!(bridge.state(), ConversationState::Closed);
        assert_eq!(bridge.snapshot().status(), 1006);
        assert!(bridge.session().is_none());

        // A late open neither rewinds the state nor stores the session
        let (session, _sink) = Session::mock();
        bridge.on_open(session);
        assert_eq!(bridge.state(), ConversationState::Closed);
        assert!(bridge.session().is_none());
    }

    #[test]
    fn test_status_is_recorded_once() {
        let bridge = bridge();
        let (session, sink) = Session::mock();
        bridge.on_open(session);

        bridge.close();
        bridge.close();
        assert_eq!(sink.closes(), vec![(1000, "closed session.".to_string())]);
        assert_eq!(bridge.state(), ConversationState::Closing);

        bridge.on_close(1000, "", false);
        bridge.on_close(1006, "", true);
        bridge.close();
        assert_eq!(bridge.snapshot().status(), 1000);
        assert_eq!(sink.closes().len(), 1);
    }

    #[test]
    fn test_close_without_session_is_noop() {
        let bridge = bridge();
        bridge.close();
        assert_eq!(bridge.state(), ConversationState::Connecting);
    }

    #[test]
    fn test_failure_before_open_is_kept() {
        let bridge = bridge();
        bridge.on_error(&Error::Connection("refused".to_string()));

        assert!(bridge.wait_open(Duration::ZERO));
        assert!(matches!(bridge.take_failure(), Some(Error::Connection(_))));
        assert!(bridge.take_failure().is_none());
    }

    #[test]
    fn test_failure_after_open_is_not_kept() {
        let bridge = bridge();
        let (session, _sink) = Session::mock();
        bridge.on_open(session);
        bridge.on_error(&Error::Connection("reset".to_string()));
        assert!(bridge.take_failure().is_none());
        assert_eq!(bridge.state(), ConversationState::Open);
    }

    #[test]
    fn test_error_after_open_releases_before_close_is_recorded() {
        let bridge = bridge();
        let (session, sink) = Session::mock();
        bridge.on_open(session);

        bridge.on_error(&Error::Connection("reset".to_string()));
        assert!(bridge.wait_complete(Duration::ZERO));
        assert_eq!(bridge.snapshot().status(), Response::UNCLOSED);

        // The caller closes while the task is still winding down
        bridge.close();
        assert_eq!(sink.closes().len(), 1);

        bridge.on_close(CloseCode::Abnormal.code(), "", true);
        assert_eq!(bridge.state(), ConversationState::Closed);
        assert_eq!(bridge.snapshot().status(), 1006);
    }

    #[test]
    fn test_concurrent_events() {
        let bridge = Arc::new(bridge());
        let (session, sink) = Session::mock();
        bridge.on_open(session);

        let workers: Vec<_> = (0..8)
            .map(|i| {
                let bridge = Arc::clone(&bridge);
                thread::spawn(move || {
                    let text = format!("message {}", i);
                    bridge.on_frame(&Frame::text(text.clone()));
                    bridge.on_text(&text);
                    if i % 2 == 0 {
                        bridge.on_close(4000 + i as u16, "", true);
                    } else {
                        bridge.close();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert!(bridge.wait_complete(Duration::ZERO));
        assert_eq!(bridge.state(), ConversationState::Closed);
        let status = bridge.snapshot().status();
        assert!((4000..4008).contains(&status), "{}", status);
        assert!(sink.closes().len() <= 1);
    }
}
