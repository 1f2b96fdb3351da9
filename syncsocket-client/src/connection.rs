//! Client connection task
//!
//! One task per connection: it performs the opening handshake, then
//! multiplexes inbound frames with outbound commands from the
//! [`Session`](crate::Session) until the connection closes. All listener
//! callbacks for the connection are issued from this task.

use crate::listener::SessionListener;
use crate::session::{ChannelSink, Command, Session};
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use syncsocket_core::error::{FrameError, MessageError, TimeoutError};
use syncsocket_core::handshake::{self, HandshakeRequest};
use syncsocket_core::protocol::constants::MAX_HEADER_SIZE;
use syncsocket_core::{
    CloseCode, Error, Frame, FrameParser, Message, MessageAssembler, Opcode, Result,
    TransportConfig, TransportStream,
};
use syncsocket_transport_tcp::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection is being established
    Connecting,
    /// Connection is established and ready
    Open,
    /// A close frame was sent; waiting for the peer's reply
    Closing,
    /// Connection is closed
    Closed,
}

/// Send the upgrade request and validate the answer
///
/// Returns any bytes that followed the response headers.
pub(crate) async fn perform_handshake<S: TransportStream>(
    stream: &mut S,
    request: &HandshakeRequest,
) -> Result<BytesMut> {
    stream
        .write_all(handshake::request_to_string(request).as_bytes())
        .await?;
    stream.flush().await?;

    let key = request
        .key()
        .ok_or_else(|| Error::Other("upgrade request has no key".to_string()))?;

    let mut buf = BytesMut::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::Connection(
                "connection closed during handshake".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((response, consumed)) = handshake::parse_server_handshake(&buf)? {
            handshake::validate_server_handshake(&response, key)?;
            let _ = buf.split_to(consumed);
            return Ok(buf);
        }

        if buf.len() > MAX_HEADER_SIZE {
            return Err(FrameError::TooLarge {
                size: buf.len(),
                max: MAX_HEADER_SIZE,
            }
            .into());
        }
    }
}

/// Connect over TCP and upgrade, bounded by the handshake timeout
pub(crate) async fn open(
    authority: &str,
    request: &HandshakeRequest,
    config: &TransportConfig,
) -> Result<(TcpStream, BytesMut)> {
    let connecting = async {
        let mut stream = TcpStream::connect(authority, config).await?;
        let leftover = perform_handshake(&mut stream, request).await?;
        Ok::<_, Error>((stream, leftover))
    };
    tokio::time::timeout(config.handshake_timeout, connecting)
        .await
        .map_err(|_| {
            Error::Timeout(TimeoutError::Handshake {
                timeout: config.handshake_timeout,
            })
        })?
}

/// An upgraded client connection
pub(crate) struct ClientConnection<S> {
    id: u64,
    stream: S,
    config: TransportConfig,
    close_timeout: std::time::Duration,
    listener: Arc<dyn SessionListener>,
    parser: FrameParser,
    assembler: MessageAssembler,
    state: ConnectionState,
    open: Arc<AtomicBool>,
    close_deadline: Option<Instant>,
    sent_close_code: Option<u16>,
}

impl<S: TransportStream> ClientConnection<S> {
    pub(crate) fn new(
        id: u64,
        stream: S,
        config: TransportConfig,
        close_timeout: std::time::Duration,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        Self {
            id,
            parser: FrameParser::with_max_frame_size(config.max_frame_size),
            assembler: MessageAssembler::with_max_message_size(config.max_message_size),
            stream,
            config,
            close_timeout,
            listener,
            state: ConnectionState::Connecting,
            open: Arc::new(AtomicBool::new(false)),
            close_deadline: None,
            sent_close_code: None,
        }
    }

    /// Announce the session and serve it until the connection closes
    ///
    /// `leftover` holds bytes that arrived together with the handshake
    /// response.
    pub(crate) async fn run(mut self, leftover: BytesMut) {
        let remote_addr = match self.stream.remote_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.listener.on_error(&e);
                return;
            }
        };

        let (tx, mut commands) = mpsc::unbounded_channel();
        self.state = ConnectionState::Open;
        self.open.store(true, Ordering::Release);
        let session = Session::new(
            self.id,
            remote_addr,
            Arc::new(ChannelSink::new(tx, self.open.clone())),
        );
        tracing::debug!(id = self.id, %remote_addr, "connection open");
        self.listener.on_open(session);

        if !leftover.is_empty() && self.on_bytes(&leftover).await {
            return;
        }

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut commands_open = true;
        loop {
            let deadline = self.close_deadline;
            tokio::select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.on_command(command).await,
                    None => commands_open = false,
                },
                read = self.stream.read(&mut buf) => match read {
                    Ok(0) => {
                        self.finish(CloseCode::Abnormal.code(), "", true).await;
                        return;
                    }
                    Ok(n) => {
                        if self.on_bytes(&buf[..n]).await {
                            return;
                        }
                    }
                    Err(e) => {
                        self.listener.on_error(&e);
                        self.finish(CloseCode::Abnormal.code(), "", true).await;
                        return;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    tracing::debug!(id = self.id, "peer did not answer the close frame");
                    let code = self.sent_close_code.unwrap_or(CloseCode::Abnormal.code());
                    self.finish(code, "", false).await;
                    return;
                }
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Send { message, ack } => {
                let result = if self.state == ConnectionState::Open {
                    self.write_message(&message).await
                } else {
                    Err(Error::Connection("connection is closing".to_string()))
                };
                let _ = ack.send(result);
            }
            Command::Close { code, reason } => {
                if self.state != ConnectionState::Open {
                    return;
                }
                let code = if CloseCode::is_sendable(code) {
                    code
                } else {
                    CloseCode::Normal.code()
                };
                tracing::debug!(id = self.id, code, "sending close frame");
                self.start_close(code, &reason).await;
            }
        }
    }

    async fn start_close(&mut self, code: u16, reason: &str) {
        self.state = ConnectionState::Closing;
        self.open.store(false, Ordering::Release);
        self.sent_close_code = Some(code);
        self.close_deadline = Some(Instant::now() + self.close_timeout);
        if let Err(e) = self.write_frame(Frame::close(Some(code), Some(reason))).await {
            tracing::debug!(id = self.id, error = %e, "failed to send close frame");
        }
    }

    /// Process raw bytes; returns true once the connection is finished
    async fn on_bytes(&mut self, data: &[u8]) -> bool {
        for parsed in self.parser.feed(data) {
            let frame = match parsed {
                Ok(frame) => frame,
                Err(e) => {
                    self.fail(e).await;
                    return true;
                }
            };
            if self.on_frame(frame).await {
                return true;
            }
        }
        false
    }

    async fn on_frame(&mut self, frame: Frame) -> bool {
        match frame.opcode {
            Opcode::Ping => {
                if self.state == ConnectionState::Open {
                    if let Err(e) = self.write_frame(Frame::pong(frame.payload.clone())).await {
                        tracing::debug!(id = self.id, error = %e, "failed to answer ping");
                    }
                }
                false
            }
            Opcode::Pong => false,
            Opcode::Close => {
                let (code, reason) = match frame.close_payload() {
                    Ok(Some((code, reason))) => (code, reason),
                    Ok(None) => (CloseCode::NoStatus.code(), String::new()),
                    Err(e) => {
                        self.fail(e).await;
                        return true;
                    }
                };
                tracing::debug!(id = self.id, code, %reason, "close frame received");
                if self.state == ConnectionState::Open {
                    let reply = if CloseCode::is_sendable(code) {
                        Frame::close(Some(code), None)
                    } else {
                        Frame::close(None, None)
                    };
                    let _ = self.write_frame(reply).await;
                    self.finish(code, &reason, true).await;
                } else {
                    self.finish(code, &reason, false).await;
                }
                true
            }
            _ => {
                self.listener.on_frame(&frame);
                #[cfg(feature = "metrics")]
                metrics::counter!("syncsocket_client_bytes_received_total")
                    .increment(frame.payload.len() as u64);

                match self.assembler.feed_frame(frame) {
                    Ok(Some(Message::Text(text))) => {
                        #[cfg(feature = "metrics")]
                        metrics::counter!("syncsocket_client_messages_received_total").increment(1);
                        self.listener.on_text(&text);
                        false
                    }
                    Ok(Some(Message::Binary(data))) => {
                        #[cfg(feature = "metrics")]
                        metrics::counter!("syncsocket_client_messages_received_total").increment(1);
                        self.listener.on_binary(&data);
                        false
                    }
                    Ok(_) => false,
                    Err(e) => {
                        self.fail(e).await;
                        true
                    }
                }
            }
        }
    }

    /// Protocol failure: report it, tell the peer why, and close
    async fn fail(&mut self, error: Error) {
        let code = match &error {
            Error::Frame(FrameError::TooLarge { .. })
            | Error::Message(MessageError::TooLarge { .. }) => CloseCode::TooBig,
            Error::InvalidUtf8 => CloseCode::InvalidPayload,
            _ => CloseCode::ProtocolError,
        };
        tracing::debug!(id = self.id, error = %error, "protocol failure");
        self.listener.on_error(&error);
        if self.state == ConnectionState::Open {
            let _ = self.write_frame(Frame::close(Some(code.code()), None)).await;
        }
        self.finish(code.code(), &error.to_string(), false).await;
    }

    async fn finish(&mut self, code: u16, reason: &str, remote: bool) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.open.store(false, Ordering::Release);
        let _ = self.stream.close().await;
        tracing::debug!(id = self.id, code, remote, "connection closed");
        self.listener.on_close(code, reason, remote);
    }

    async fn write_message(&mut self, message: &Message) -> Result<()> {
        if let Message::Text(_) | Message::Binary(_) = message {
            let len = message.as_bytes().len();
            if len > self.config.max_message_size {
                return Err(MessageError::TooLarge {
                    size: len,
                    max: self.config.max_message_size,
                }
                .into());
            }
        }
        self.write_frame(message.to_frame()).await?;
        #[cfg(feature = "metrics")]
        metrics::counter!("syncsocket_client_messages_sent_total").increment(1);
        Ok(())
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        let bytes = frame.mask(true).to_bytes();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await
    }
}
