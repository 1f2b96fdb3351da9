//! The echo server driven by the real blocking client

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use syncsocket_client::{ClientConfig, Session, SessionListener, WebSocketClient};
use syncsocket_core::Error;
use syncsocket_server::{from_fn, Connection, EchoHandler, Handler, Server, ServerConfig};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

enum Event {
    Open(Session),
    Text(String),
    Binary(Vec<u8>),
    Close(u16, bool),
    Error(String),
}

struct Forward(mpsc::Sender<Event>);

impl SessionListener for Forward {
    fn on_open(&self, session: Session) {
        let _ = self.0.send(Event::Open(session));
    }
    fn on_text(&self, text: &str) {
        let _ = self.0.send(Event::Text(text.to_string()));
    }
    fn on_binary(&self, data: &[u8]) {
        let _ = self.0.send(Event::Binary(data.to_vec()));
    }
    fn on_close(&self, code: u16, _reason: &str, remote: bool) {
        let _ = self.0.send(Event::Close(code, remote));
    }
    fn on_error(&self, error: &Error) {
        let _ = self.0.send(Event::Error(error.to_string()));
    }
}

struct Fixture {
    _runtime: Runtime,
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
}

impl Fixture {
    fn start(handler: impl Handler) -> Self {
        Self::start_with(ServerConfig::default(), handler)
    }

    fn start_with(config: ServerConfig, handler: impl Handler) -> Self {
        let runtime = Runtime::new().unwrap();
        let server = runtime
            .block_on(Server::bind(
                config.shutdown_timeout(Duration::from_millis(500)),
                handler,
            ))
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel();
        runtime.spawn(server.serve_with_graceful_shutdown(async {
            let _ = stopped.await;
        }));
        Self {
            _runtime: runtime,
            addr,
            stop: Some(stop),
        }
    }

    fn url(&self) -> String {
        format!("ws://{}/echo", self.addr)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

fn connect(url: &str) -> (WebSocketClient, Session, mpsc::Receiver<Event>) {
    let client = WebSocketClient::new(ClientConfig::default()).unwrap();
    let (tx, rx) = mpsc::channel();
    client
        .connect(url, &HashMap::new(), Arc::new(Forward(tx)))
        .unwrap();
    match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
        Event::Open(session) => (client, session, rx),
        _ => panic!("expected the connection to open"),
    }
}

fn next(rx: &mpsc::Receiver<Event>) -> Event {
    rx.recv_timeout(Duration::from_secs(5)).unwrap()
}

#[test]
fn test_text_and_binary_echo() {
    let fixture = Fixture::start(EchoHandler);
    let (client, session, rx) = connect(&fixture.url());

    session.send_text("hello").unwrap();
    match next(&rx) {
        Event::Text(text) => assert_eq!(text, "server to convert text:hello"),
        _ => panic!("expected a text reply"),
    }

    session.send_binary("你好".as_bytes().to_vec()).unwrap();
    match next(&rx) {
        Event::Binary(data) => assert_eq!(data, "你好".as_bytes()),
        _ => panic!("expected a binary reply"),
    }

    session.close(1000, "closed session.");
    match next(&rx) {
        Event::Close(code, remote) => {
            assert_eq!(code, 1000);
            assert!(!remote);
        }
        _ => panic!("expected a close"),
    }
    client.stop();
}

#[test]
fn test_server_initiated_close_code_reaches_client() {
    let handler = from_fn(|mut conn: Connection| async move {
        if conn.next().await?.is_some() {
            conn.close(Some(4000), Some("enough")).await?;
        }
        while conn.next().await?.is_some() {}
        Ok(())
    });
    let fixture = Fixture::start(handler);
    let (client, session, rx) = connect(&fixture.url());

    session.send_text("anything").unwrap();
    match next(&rx) {
        Event::Close(code, remote) => {
            assert_eq!(code, 4000);
            assert!(remote);
        }
        _ => panic!("expected a close"),
    }
    client.stop();
}

#[test]
fn test_graceful_shutdown_sends_going_away() {
    let mut fixture = Fixture::start(EchoHandler);
    let (client, _session, rx) = connect(&fixture.url());

    if let Some(stop) = fixture.stop.take() {
        stop.send(()).unwrap();
    }
    match next(&rx) {
        Event::Close(code, remote) => {
            assert_eq!(code, 1001);
            assert!(remote);
        }
        _ => panic!("expected a close"),
    }
    client.stop();
}

#[test]
fn test_full_server_rejects_upgrade() {
    let fixture = Fixture::start_with(ServerConfig::default().max_connections(1), EchoHandler);
    let (first, _session, _events) = connect(&fixture.url());

    let client = WebSocketClient::new(ClientConfig::default()).unwrap();
    let (tx, rx) = mpsc::channel();
    client
        .connect(&fixture.url(), &HashMap::new(), Arc::new(Forward(tx)))
        .unwrap();
    match next(&rx) {
        Event::Error(message) => assert!(message.contains("503"), "{}", message),
        _ => panic!("expected the upgrade to be refused"),
    }
    client.stop();
    first.stop();
}
