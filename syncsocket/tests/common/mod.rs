//! Echo server fixture running on a runtime of its own

use std::net::SocketAddr;
use std::time::Duration;
use syncsocket_server::{EchoHandler, Handler, Server, ServerConfig};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;

pub struct EchoServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    _runtime: Runtime,
}

impl EchoServer {
    pub fn start() -> Self {
        Self::start_with(EchoHandler)
    }

    pub fn start_with(handler: impl Handler) -> Self {
        let runtime = Runtime::new().expect("fixture runtime");
        let config = ServerConfig::default().shutdown_timeout(Duration::from_millis(500));
        let server = runtime
            .block_on(Server::bind(config, handler))
            .expect("fixture bind");
        let addr = server.local_addr().expect("fixture address");

        let (stop, stopped) = oneshot::channel();
        runtime.spawn(server.serve_with_graceful_shutdown(async {
            let _ = stopped.await;
        }));

        Self {
            addr,
            stop: Some(stop),
            _runtime: runtime,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/echo", self.addr)
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// An address nothing listens on
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    listener.local_addr().expect("probe address")
}
