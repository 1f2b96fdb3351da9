//! Connection registry for the echo server
//!
//! Every server owns one [`ConnectionManager`]. Connections register after
//! a successful upgrade and unregister when their [`ConnectionGuard`] is
//! dropped; a graceful shutdown is broadcast to all of them through a
//! watch channel.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};

/// Connection manager statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Number of open connections
    pub active_connections: usize,
    /// Number of connections since the server started
    pub total_connections: u64,
    /// Largest number of concurrent connections seen
    pub peak_connections: usize,
}

/// What the registry knows about one connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Peer address
    pub remote_addr: SocketAddr,
    /// When the connection registered
    pub connected_at: Instant,
}

/// Registry of the connections served by one server
#[derive(Debug)]
pub struct ConnectionManager {
    connections: Mutex<HashMap<u64, ConnectionInfo>>,
    stats: Mutex<ManagerStats>,
    next_id: AtomicU64,
    shutdown: watch::Sender<bool>,
    drained: Notify,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Create an empty registry
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            connections: Mutex::new(HashMap::new()),
            stats: Mutex::new(ManagerStats::default()),
            next_id: AtomicU64::new(1),
            shutdown,
            drained: Notify::new(),
        }
    }

    /// Register a connection unless `max_connections` are already open
    /// or the server is shutting down
    ///
    /// The connection stays registered until the returned guard is
    /// dropped. The receiver flips to `true` when shutdown starts.
    pub fn register(
        self: &Arc<Self>,
        remote_addr: SocketAddr,
        max_connections: usize,
    ) -> Option<(ConnectionGuard, watch::Receiver<bool>)> {
        if self.is_shutting_down() {
            return None;
        }

        let mut connections = self.connections.lock();
        if connections.len() >= max_connections {
            tracing::debug!(%remote_addr, max_connections, "connection limit reached");
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        connections.insert(
            id,
            ConnectionInfo {
                remote_addr,
                connected_at: Instant::now(),
            },
        );

        let mut stats = self.stats.lock();
        stats.total_connections += 1;
        stats.active_connections = connections.len();
        stats.peak_connections = stats.peak_connections.max(connections.len());

        #[cfg(feature = "metrics")]
        {
            metrics::counter!("syncsocket_server_connections_total").increment(1);
            metrics::gauge!("syncsocket_server_active_connections").set(connections.len() as f64);
        }

        Some((
            ConnectionGuard {
                id,
                manager: Arc::clone(self),
            },
            self.shutdown.subscribe(),
        ))
    }

    fn unregister(&self, id: u64) {
        let mut connections = self.connections.lock();
        if connections.remove(&id).is_some() {
            self.stats.lock().active_connections = connections.len();
            #[cfg(feature = "metrics")]
            metrics::gauge!("syncsocket_server_active_connections").set(connections.len() as f64);
        }
        if connections.is_empty() {
            self.drained.notify_waiters();
        }
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Snapshot of the open connections
    pub fn connections(&self) -> Vec<(u64, ConnectionInfo)> {
        self.connections
            .lock()
            .iter()
            .map(|(id, info)| (*id, info.clone()))
            .collect()
    }

    /// Current statistics
    pub fn stats(&self) -> ManagerStats {
        self.stats.lock().clone()
    }

    /// Ask every connection to close with "going away"
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether shutdown has started
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait until no connection is registered; false if `timeout` passed
    /// first
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let drained = self.drained.notified();
            if self.connection_count() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                return self.connection_count() == 0;
            }
        }
    }
}

/// Keeps a connection registered while alive
#[derive(Debug)]
pub struct ConnectionGuard {
    id: u64,
    manager: Arc<ConnectionManager>,
}

impl ConnectionGuard {
    /// Registry id of the connection
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        ([127, 0, 0, 1], 40000).into()
    }

    #[test]
    fn test_register_and_drop() {
        let manager = Arc::new(ConnectionManager::new());
        let (first, _) = manager.register(addr(), 10).unwrap();
        let (second, _) = manager.register(addr(), 10).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(manager.connection_count(), 2);

        drop(first);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.connections()[0].0, second.id());

        let stats = manager.stats();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.peak_connections, 2);
    }

    #[test]
    fn test_limit_is_enforced() {
        let manager = Arc::new(ConnectionManager::new());
        let _held = manager.register(addr(), 1).unwrap();
        assert!(manager.register(addr(), 1).is_none());
    }

    #[test]
    fn test_no_registration_after_shutdown() {
        let manager = Arc::new(ConnectionManager::new());
        let (_guard, mut signal) = manager.register(addr(), 10).unwrap();
        assert!(!*signal.borrow_and_update());

        manager.shutdown();
        assert!(manager.is_shutting_down());
        assert!(*signal.borrow_and_update());
        assert!(manager.register(addr(), 10).is_none());
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let manager = Arc::new(ConnectionManager::new());
        assert!(manager.wait_idle(Duration::from_millis(10)).await);

        let (guard, _) = manager.register(addr(), 10).unwrap();
        assert!(!manager.wait_idle(Duration::from_millis(20)).await);

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.wait_idle(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert!(waiter.await.unwrap());
    }
}
