use crate::peer::{NodeAddr, PeerConnection, PeerConnector, PeerError};
use std::sync::{Arc, Mutex};

/// ConnectionPool keeps idle connections to a single destination (the current backup) so that
/// forwarding a write doesn't pay for connection setup. `pop_connection()` never waits for a
/// connection to be returned: an empty pool opens a fresh one.
pub struct ConnectionPool {
    logger: slog::Logger,
    connector: Arc<dyn PeerConnector>,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    destination: Option<NodeAddr>,
    idle: Vec<Box<dyn PeerConnection>>,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Connection pool has no destination")]
    NoDestination,
    #[error(transparent)]
    Connect(#[from] PeerError),
}

impl ConnectionPool {
    pub fn new(logger: slog::Logger, connector: Arc<dyn PeerConnector>, capacity: usize) -> Self {
        ConnectionPool {
            logger,
            connector,
            capacity,
            inner: Mutex::new(PoolInner {
                destination: None,
                idle: Vec::with_capacity(capacity),
            }),
        }
    }

    /// `initialize_connections()` drops every pooled connection, points the pool at `destination`
    /// and warms it up with up to `capacity` connections. Individual failures are logged and
    /// skipped. Returns the number of connections opened.
    pub async fn initialize_connections(&self, destination: NodeAddr) -> usize {
        let previous = {
            let mut inner = self.lock();
            inner.destination = Some(destination.clone());
            std::mem::replace(&mut inner.idle, Vec::with_capacity(self.capacity))
        };
        if !previous.is_empty() {
            slog::debug!(self.logger, "Closed {} pooled connections", previous.len());
        }
        drop(previous);

        let mut opened = 0;
        for _ in 0..self.capacity {
            match self.connector.connect(&destination).await {
                Ok(connection) => {
                    if !self.try_pool(connection) {
                        slog::info!(self.logger, "Pool destination changed during warm-up for {}", destination);
                        break;
                    }
                    opened += 1;
                }
                Err(e) => {
                    slog::warn!(
                        self.logger,
                        "Failed to open pooled connection to {}, pooled so far = {}: {}",
                        destination,
                        opened,
                        e
                    );
                }
            }
        }

        slog::info!(self.logger, "Connection pool now targets {} with {} connections", destination, opened);
        opened
    }

    /// `pop_connection()` takes an idle connection, or opens a new one to the current destination
    /// if the pool is empty. The caller returns it with `add_connection()` after a successful
    /// call, and drops it on failure.
    pub async fn pop_connection(&self) -> Result<Box<dyn PeerConnection>, PoolError> {
        let destination = {
            let mut inner = self.lock();
            if let Some(connection) = inner.idle.pop() {
                return Ok(connection);
            }
            inner.destination.clone().ok_or(PoolError::NoDestination)?
        };

        let connection = self.connector.connect(&destination).await?;
        Ok(connection)
    }

    pub fn add_connection(&self, connection: Box<dyn PeerConnection>) {
        if !self.try_pool(connection) {
            slog::debug!(self.logger, "Discarded connection to a previous pool destination");
        }
    }

    pub fn destination(&self) -> Option<NodeAddr> {
        self.lock().destination.clone()
    }

    #[cfg(test)]
    pub(crate) fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    // Pools `connection` if it targets the current destination and there is room. The connection
    // is dropped (closed) otherwise.
    fn try_pool(&self, connection: Box<dyn PeerConnection>) -> bool {
        let mut inner = self.lock();
        if inner.destination.as_ref() != Some(connection.addr()) {
            return false;
        }
        if inner.idle.len() >= self.capacity {
            return true;
        }
        inner.idle.push(connection);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().expect("ConnectionPool mutex guard poison")
    }
}
