//! Server side of an upgraded WebSocket connection
//!
//! A [`Connection`] is handed to the [`Handler`](crate::Handler) after the
//! opening handshake. The handler pulls messages with [`Connection::next`];
//! pings are answered and closing handshakes are tracked underneath it.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use syncsocket_core::error::{FrameError, MessageError};
use syncsocket_core::{
    CloseCode, CloseFrame, Error, Frame, FrameParser, Message, MessageAssembler, Result,
    TransportStream,
};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant as Deadline};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is established and ready
    Open,
    /// A close frame was sent or received; the handshake is not finished
    Closing,
    /// Connection is closed
    Closed,
}

/// Connection counters
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// When the handshake completed
    pub established_at: Instant,
    /// Messages sent count
    pub messages_sent: u64,
    /// Messages received count
    pub messages_received: u64,
    /// Payload bytes sent
    pub bytes_sent: u64,
    /// Payload bytes received
    pub bytes_received: u64,
}

/// Limits applied to one connection
#[derive(Debug, Clone)]
pub(crate) struct ConnectionLimits {
    pub(crate) max_frame_size: usize,
    pub(crate) max_message_size: usize,
    pub(crate) close_timeout: Duration,
}

/// An upgraded server connection
pub struct Connection {
    id: u64,
    remote_addr: SocketAddr,
    stream: Box<dyn TransportStream>,
    parser: FrameParser,
    assembler: MessageAssembler,
    pending: VecDeque<Result<Frame>>,
    state: ConnectionState,
    /// Set when the peer closed first and has not been answered yet
    owed_reply: Option<Option<CloseFrame>>,
    close_timeout: Duration,
    close_deadline: Option<Deadline>,
    shutdown: watch::Receiver<bool>,
    watch_shutdown: bool,
    /// Connection counters
    pub metadata: ConnectionMetadata,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state)
            .field("metadata", &self.metadata)
            .field("stream", &"<stream>")
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        remote_addr: SocketAddr,
        stream: Box<dyn TransportStream>,
        leftover: BytesMut,
        limits: ConnectionLimits,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut parser = FrameParser::with_max_frame_size(limits.max_frame_size);
        let pending = if leftover.is_empty() {
            VecDeque::new()
        } else {
            parser.feed(&leftover).into()
        };

        Self {
            id,
            remote_addr,
            stream,
            parser,
            assembler: MessageAssembler::with_max_message_size(limits.max_message_size),
            pending,
            state: ConnectionState::Open,
            owed_reply: None,
            close_timeout: limits.close_timeout,
            close_deadline: None,
            shutdown,
            watch_shutdown: true,
            metadata: ConnectionMetadata {
                established_at: Instant::now(),
                messages_sent: 0,
                messages_received: 0,
                bytes_sent: 0,
                bytes_received: 0,
            },
        }
    }

    /// Connection id, unique per server
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Wait for the next message
    ///
    /// Yields text and binary messages, and a [`Message::Close`] when the
    /// peer starts the closing handshake. Returns `None` once the
    /// connection is closed; a peer close that the handler did not answer
    /// is answered with the same code before that.
    pub async fn next(&mut self) -> Result<Option<Message>> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            if self.state == ConnectionState::Closed {
                return Ok(None);
            }

            if let Some(parsed) = self.pending.pop_front() {
                let frame = match parsed {
                    Ok(frame) => frame,
                    Err(e) => return self.fail(e).await,
                };
                if let Some(message) = self.on_frame(frame).await? {
                    return Ok(Some(message));
                }
                continue;
            }

            if let Some(peer) = self.owed_reply.take() {
                let code = peer.map(|frame| frame.code);
                self.reply_close(code, None).await;
                return Ok(None);
            }

            let deadline = self.close_deadline;
            let watching = self.watch_shutdown && self.state == ConnectionState::Open;
            tokio::select! {
                changed = self.shutdown.changed(), if watching => match changed {
                    Ok(()) if *self.shutdown.borrow() => {
                        tracing::debug!(id = self.id, "closing for server shutdown");
                        self.start_close(CloseCode::Away.code(), "server shutting down").await?;
                    }
                    Ok(()) => {}
                    Err(_) => self.watch_shutdown = false,
                },
                read = self.stream.read(&mut buf) => match read {
                    Ok(0) => {
                        tracing::debug!(id = self.id, "peer went away");
                        self.finish().await;
                        return Ok(None);
                    }
                    Ok(n) => self.pending.extend(self.parser.feed(&buf[..n])),
                    Err(e) => {
                        self.finish().await;
                        return Err(e);
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Deadline::now)), if deadline.is_some() => {
                    tracing::debug!(id = self.id, "peer did not answer the close frame");
                    self.finish().await;
                    return Ok(None);
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<Option<Message>> {
        self.metadata.bytes_received += frame.payload_len() as u64;
        let message = match self.assembler.feed_frame(frame) {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(None),
            Err(e) => return self.fail(e).await,
        };

        match message {
            Message::Ping(payload) => {
                if self.state == ConnectionState::Open {
                    self.write_frame(Frame::pong(payload)).await?;
                }
                Ok(None)
            }
            Message::Pong(_) => Ok(None),
            Message::Close(peer) => {
                tracing::debug!(id = self.id, code = ?peer.as_ref().map(|f| f.code), "close frame received");
                if self.state == ConnectionState::Open {
                    self.state = ConnectionState::Closing;
                    self.owed_reply = Some(peer.clone());
                    Ok(Some(Message::Close(peer)))
                } else {
                    // Reply to our own close
                    self.finish().await;
                    Ok(None)
                }
            }
            data => {
                self.metadata.messages_received += 1;
                if self.state == ConnectionState::Open {
                    Ok(Some(data))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Send a message
    pub async fn send(&mut self, message: Message) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(Error::Connection("connection is closing".to_string()));
        }
        let len = message.as_bytes().len() as u64;
        self.write_frame(message.to_frame()).await?;
        self.metadata.messages_sent += 1;
        self.metadata.bytes_sent += len;
        #[cfg(feature = "metrics")]
        metrics::counter!("syncsocket_server_messages_sent_total").increment(1);
        Ok(())
    }

    /// Send a text message
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.send(Message::text(text)).await
    }

    /// Send a binary message
    pub async fn send_binary(&mut self, data: impl Into<Bytes>) -> Result<()> {
        self.send(Message::binary(data)).await
    }

    /// Close the connection
    ///
    /// Answers a pending peer close and finishes, or starts the closing
    /// handshake; [`next`](Self::next) then returns `None` once the peer
    /// replies. Codes that may not be sent produce an empty close frame.
    pub async fn close(&mut self, code: Option<u16>, reason: Option<&str>) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Ok(()),
            ConnectionState::Closing => {
                if self.owed_reply.take().is_some() {
                    self.reply_close(code, reason).await;
                }
                Ok(())
            }
            ConnectionState::Open => match code {
                Some(code) if CloseCode::is_sendable(code) => {
                    self.start_close(code, reason.unwrap_or_default()).await
                }
                _ => {
                    self.state = ConnectionState::Closing;
                    self.close_deadline = Some(Deadline::now() + self.close_timeout);
                    self.write_frame(Frame::close(None, None)).await
                }
            },
        }
    }

    async fn start_close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.state = ConnectionState::Closing;
        self.close_deadline = Some(Deadline::now() + self.close_timeout);
        self.write_frame(Frame::close(Some(code), Some(reason))).await
    }

    async fn reply_close(&mut self, code: Option<u16>, reason: Option<&str>) {
        let frame = match code {
            Some(code) if CloseCode::is_sendable(code) => Frame::close(Some(code), reason),
            _ => Frame::close(None, None),
        };
        if let Err(e) = self.write_frame(frame).await {
            tracing::debug!(id = self.id, error = %e, "failed to answer close frame");
        }
        self.finish().await;
    }

    /// Protocol failure: tell the peer why and drop the connection
    async fn fail<T>(&mut self, error: Error) -> Result<T> {
        let code = match &error {
            Error::Frame(FrameError::TooLarge { .. })
            | Error::Message(MessageError::TooLarge { .. }) => CloseCode::TooBig,
            Error::InvalidUtf8 => CloseCode::InvalidPayload,
            _ => CloseCode::ProtocolError,
        };
        tracing::debug!(id = self.id, error = %error, "protocol failure");
        if self.state == ConnectionState::Open {
            let _ = self.write_frame(Frame::close(Some(code.code()), None)).await;
        }
        self.finish().await;
        Err(error)
    }

    async fn finish(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.owed_reply = None;
        self.close_deadline = None;
        let _ = self.stream.close().await;
        tracing::debug!(id = self.id, "connection closed");
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        // Server frames are never masked
        let bytes = frame.to_bytes();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncsocket_core::transport::mock::{self, MockStream};

    fn limits() -> ConnectionLimits {
        ConnectionLimits {
            max_frame_size: 1024,
            max_message_size: 4096,
            close_timeout: Duration::from_millis(200),
        }
    }

    fn connection(stream: MockStream, leftover: BytesMut) -> (Connection, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let remote = stream.remote_addr().unwrap();
        (
            Connection::new(1, remote, Box::new(stream), leftover, limits(), rx),
            tx,
        )
    }

    async fn send(peer: &mut MockStream, frame: Frame) {
        peer.write_all(&frame.mask(true).to_bytes()).await.unwrap();
    }

    async fn read_frame(peer: &mut MockStream, parser: &mut FrameParser) -> Frame {
        let mut buf = [0u8; 1024];
        loop {
            let n = peer.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream ended");
            if let Some(frame) = parser.feed(&buf[..n]).pop() {
                return frame.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_leftover_bytes_are_delivered_first() {
        let (mut peer, server) = mock::pair();
        let leftover = BytesMut::from(&Frame::text("early").mask(true).to_bytes()[..]);
        let (mut conn, _tx) = connection(server, leftover);

        send(&mut peer, Frame::text("later")).await;
        assert_eq!(conn.next().await.unwrap(), Some(Message::text("early")));
        assert_eq!(conn.next().await.unwrap(), Some(Message::text("later")));
        assert_eq!(conn.metadata.messages_received, 2);
    }

    #[tokio::test]
    async fn test_ping_is_answered() {
        let (mut peer, server) = mock::pair();
        let (mut conn, _tx) = connection(server, BytesMut::new());

        send(&mut peer, Frame::ping(&b"p"[..])).await;
        send(&mut peer, Frame::binary(&b"\x01\x02"[..])).await;
        assert_eq!(
            conn.next().await.unwrap(),
            Some(Message::binary(&b"\x01\x02"[..]))
        );

        let mut parser = FrameParser::new();
        let pong = read_frame(&mut peer, &mut parser).await;
        assert_eq!(pong.opcode, syncsocket_core::Opcode::Pong);
        assert!(!pong.masked);
        assert_eq!(&pong.payload[..], b"p");
    }

    #[tokio::test]
    async fn test_peer_close_is_surfaced_then_answered() {
        let (mut peer, server) = mock::pair();
        let (mut conn, _tx) = connection(server, BytesMut::new());

        send(&mut peer, Frame::close(Some(4000), Some("done"))).await;
        assert_eq!(
            conn.next().await.unwrap(),
            Some(Message::close(4000, "done"))
        );
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.send_text("late").await.is_err());

        // Not answered by the handler, so next() answers with the same code
        assert_eq!(conn.next().await.unwrap(), None);
        assert_eq!(conn.state(), ConnectionState::Closed);

        let mut parser = FrameParser::new();
        let reply = read_frame(&mut peer, &mut parser).await;
        assert_eq!(reply.close_payload().unwrap(), Some((4000, String::new())));
    }

    #[tokio::test]
    async fn test_server_close_waits_for_reply() {
        let (mut peer, server) = mock::pair();
        let (mut conn, _tx) = connection(server, BytesMut::new());

        conn.close(Some(4000), Some("bye")).await.unwrap();
        let mut parser = FrameParser::new();
        let sent = read_frame(&mut peer, &mut parser).await;
        assert_eq!(sent.close_payload().unwrap(), Some((4000, "bye".to_string())));

        send(&mut peer, Frame::close(Some(4000), None)).await;
        assert_eq!(conn.next().await.unwrap(), None);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_server_close_times_out() {
        let (_peer, server) = mock::pair();
        let (mut conn, _tx) = connection(server, BytesMut::new());

        conn.close(Some(1000), None).await.unwrap();
        assert_eq!(conn.next().await.unwrap(), None);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_shutdown_signal_sends_going_away() {
        let (mut peer, server) = mock::pair();
        let (mut conn, tx) = connection(server, BytesMut::new());

        let task = tokio::spawn(async move { conn.next().await });
        tx.send(true).unwrap();

        let mut parser = FrameParser::new();
        let sent = read_frame(&mut peer, &mut parser).await;
        assert_eq!(
            sent.close_payload().unwrap().map(|(code, _)| code),
            Some(CloseCode::Away.code())
        );
        send(&mut peer, Frame::close(Some(1001), None)).await;
        assert_eq!(task.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_fails_with_too_big() {
        let (mut peer, server) = mock::pair();
        let (mut conn, _tx) = connection(server, BytesMut::new());

        send(&mut peer, Frame::binary(vec![0u8; 2048])).await;
        assert!(conn.next().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Closed);

        let mut parser = FrameParser::new();
        let sent = read_frame(&mut peer, &mut parser).await;
        assert_eq!(
            sent.close_payload().unwrap().map(|(code, _)| code),
            Some(CloseCode::TooBig.code())
        );
    }

    #[tokio::test]
    async fn test_eof_ends_the_stream() {
        let (peer, server) = mock::pair();
        let (mut conn, _tx) = connection(server, BytesMut::new());
        drop(peer);
        assert_eq!(conn.next().await.unwrap(), None);
    }
}
