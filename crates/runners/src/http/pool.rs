//! Keep-alive connections shared between requests.

use super::connection::{Connection, Target};
use super::error::HttpError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;
use url::Url;

/// Idle connections keyed by target. Sockets in use and idle sockets
/// together never exceed `max_sockets`.
pub struct ConnectionPool {
    idle: Mutex<HashMap<Target, Vec<Connection>>>,
    sockets: Arc<Semaphore>,
    max_sockets: usize,
}

/// A connection on loan from the pool, holding one socket slot.
pub struct Checkout {
    pub connection: Connection,
    pub reused: bool,
    _permit: OwnedSemaphorePermit,
}

impl ConnectionPool {
    pub fn new(max_sockets: usize) -> Self {
        let max_sockets = max_sockets.max(1);
        Self {
            idle: Mutex::new(HashMap::new()),
            sockets: Arc::new(Semaphore::new(max_sockets)),
            max_sockets,
        }
    }

    pub fn max_sockets(&self) -> usize {
        self.max_sockets
    }

    pub fn idle_count(&self, target: &Target) -> usize {
        self.idle.lock().get(target).map_or(0, Vec::len)
    }

    pub fn total_idle(&self) -> usize {
        self.idle.lock().values().map(Vec::len).sum()
    }

    /// Wait for a free socket slot, then reuse an idle connection or open
    /// a new one.
    pub async fn checkout(&self, target: &Target, proxy: Option<&Url>) -> Result<Checkout, HttpError> {
        let permit = self.acquire().await?;

        let idle = {
            let mut idle = self.idle.lock();
            let connection = idle.get_mut(target).and_then(Vec::pop);
            if idle.get(target).is_some_and(Vec::is_empty) {
                idle.remove(target);
            }
            connection
        };
        if let Some(connection) = idle {
            debug!("Reusing connection to {}:{}", target.host, target.port);
            return Ok(Checkout {
                connection,
                reused: true,
                _permit: permit,
            });
        }

        self.open(target, proxy, permit).await
    }

    /// Open a new connection, ignoring idle ones.
    pub async fn checkout_fresh(
        &self,
        target: &Target,
        proxy: Option<&Url>,
    ) -> Result<Checkout, HttpError> {
        let permit = self.acquire().await?;
        self.open(target, proxy, permit).await
    }

    /// Return a connection whose last exchange ended cleanly. Its slot
    /// moves from in-use to idle, so the total stays the same.
    pub fn checkin(&self, target: Target, checkout: Checkout) {
        self.idle
            .lock()
            .entry(target)
            .or_default()
            .push(checkout.connection);
    }

    /// Drop every idle connection to `target`.
    pub fn discard_idle(&self, target: &Target) {
        if let Some(connections) = self.idle.lock().remove(target) {
            debug!(
                "Dropping {} idle connection(s) to {}:{}",
                connections.len(),
                target.host,
                target.port
            );
        }
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit, HttpError> {
        self.sockets
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HttpError::InvalidTarget("connection pool closed".into()))
    }

    async fn open(
        &self,
        target: &Target,
        proxy: Option<&Url>,
        permit: OwnedSemaphorePermit,
    ) -> Result<Checkout, HttpError> {
        self.evict_surplus();
        let connection = Connection::open(target, proxy).await?;
        Ok(Checkout {
            connection,
            reused: false,
            _permit: permit,
        })
    }

    /// Close idle connections until a new socket fits under the cap.
    fn evict_surplus(&self) {
        let in_use = self.max_sockets - self.sockets.available_permits();
        let mut idle = self.idle.lock();
        let mut total: usize = idle.values().map(Vec::len).sum();
        while total + in_use > self.max_sockets {
            let Some(target) = idle.keys().next().cloned() else {
                break;
            };
            if let Some(connections) = idle.get_mut(&target) {
                if !connections.is_empty() {
                    connections.remove(0);
                    total -= 1;
                }
                if connections.is_empty() {
                    idle.remove(&target);
                }
            }
        }
    }
}
