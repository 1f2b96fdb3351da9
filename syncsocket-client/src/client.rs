//! WebSocket client implementation for SyncSocket
//!
//! [`WebSocketClient`] owns a private tokio runtime. Connections run as
//! tasks on that runtime and report to a [`SessionListener`]; the client
//! itself is driven from ordinary threads.

use crate::config::ClientConfig;
use crate::connection::{open, ClientConnection};
use crate::listener::SessionListener;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use syncsocket_core::handshake::{self, ClientTarget};
use syncsocket_core::{Error, Result};
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;

/// Callback-driven WebSocket client
#[derive(Debug)]
pub struct WebSocketClient {
    config: ClientConfig,
    runtime: Mutex<Option<Runtime>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl WebSocketClient {
    /// Create a client; nothing runs until [`start`](Self::start) or the
    /// first [`connect`](Self::connect)
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            runtime: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// The client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start the worker runtime; a no-op when already running
    pub fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_none() {
            let rt = Builder::new_multi_thread()
                .worker_threads(self.config.worker_threads)
                .thread_name("syncsocket-transport")
                .enable_all()
                .build()?;
            tracing::debug!(workers = self.config.worker_threads, "client runtime started");
            *runtime = Some(rt);
        }
        Ok(())
    }

    /// Whether the worker runtime is running
    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Number of connections whose task has not finished
    pub fn active_connections(&self) -> usize {
        self.tasks.lock().iter().filter(|t| !t.is_finished()).count()
    }

    /// Open a connection to `url` and report its events to `listener`
    ///
    /// Returns as soon as the connection task is spawned. Address and
    /// header problems are returned here; network and handshake failures
    /// are reported through [`SessionListener::on_error`].
    pub fn connect(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        listener: Arc<dyn SessionListener>,
    ) -> Result<u64> {
        let target = ClientTarget::parse(url)?;
        let request =
            handshake::create_client_handshake(&target, &self.config.handshake_config(headers))?;

        self.start()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let transport = self.config.transport_config();
        let close_timeout = self.config.close_timeout;

        let runtime = self.runtime.lock();
        let handle = runtime
            .as_ref()
            .ok_or_else(|| Error::Connection("client is stopped".to_string()))?
            .spawn(async move {
                let authority = target.authority();
                tracing::debug!(id, %authority, resource = target.resource(), "connecting");

                let connected = open(&authority, &request, &transport).await;

                match connected {
                    Ok((stream, leftover)) => {
                        ClientConnection::new(id, stream, transport, close_timeout, listener)
                            .run(leftover)
                            .await
                    }
                    Err(e) => {
                        tracing::debug!(id, error = %e, "connection failed");
                        listener.on_error(&e);
                    }
                }
            });
        drop(runtime);

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
        Ok(id)
    }

    /// Stop the client, giving live connections up to `close_timeout` to
    /// finish their closing handshakes
    ///
    /// Idempotent. Connections still running afterwards are dropped
    /// without further callbacks.
    pub fn stop(&self) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();

        // Waiting needs a thread that is not itself driving a runtime
        if tokio::runtime::Handle::try_current().is_err() && !tasks.is_empty() {
            let deadline = tokio::time::Instant::now() + self.config.close_timeout;
            runtime.block_on(async {
                for task in tasks {
                    let _ = tokio::time::timeout_at(deadline, task).await;
                }
            });
        }
        runtime.shutdown_background();
        tracing::debug!("client runtime stopped");
    }

    /// Stop the client immediately; idempotent
    pub fn abort(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            self.tasks.lock().clear();
            runtime.shutdown_background();
            tracing::debug!("client runtime aborted");
        }
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        self.abort();
    }
}
