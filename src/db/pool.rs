//! Serialized access to a shared connection pool.
//!
//! [`ConnectionPoolGuard`] owns the pool handle (a [`Driver`]) together with the
//! connection string. The only way to reach the handle is through
//! [`ConnectionPoolGuard::acquire`] and [`PooledConnection::release`], both of
//! which run under the same lock. The lock covers pool bookkeeping only: waiting
//! for a free connection, running queries, and closing pools all happen after
//! it is released, so a release is never stuck behind them.

use crate::db::driver::{Driver, LifetimeHint, PoolHandle};
use crate::error::{DbError, DbResult};
use crate::models::ConnectionString;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub struct ConnectionPoolGuard<D: Driver> {
    driver: Arc<Mutex<D>>,
    connection_string: ConnectionString,
}

impl<D: Driver> Clone for ConnectionPoolGuard<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            connection_string: self.connection_string.clone(),
        }
    }
}

impl<D: Driver> std::fmt::Debug for ConnectionPoolGuard<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPoolGuard")
            .field("connection_string", &self.connection_string)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> ConnectionPoolGuard<D> {
    pub fn new(driver: D, connection_string: ConnectionString) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
            connection_string,
        }
    }

    pub fn connection_string(&self) -> &ConnectionString {
        &self.connection_string
    }

    /// Take a connection from the pool.
    ///
    /// The returned connection should be handed back with
    /// [`PooledConnection::release`]; dropping it schedules the release instead.
    pub async fn acquire(&self, hint: LifetimeHint) -> DbResult<PooledConnection<D>> {
        let pool = {
            let mut driver = self.driver.lock().await;
            driver.pool(&self.connection_string, hint).await?
        }; // Lock released here

        // May wait for another invocation to release its connection
        let connection = pool.checkout().await?;

        debug!(lifetime = %hint, "Connection acquired");

        Ok(PooledConnection {
            connection: Some(connection),
            driver: Arc::clone(&self.driver),
        })
    }

    /// Close every pool.
    ///
    /// Waits for checked-out connections to be released. Their releases still
    /// go through the guard, so the pools are closed after the lock is dropped.
    pub async fn close(&self) {
        let pools = self.driver.lock().await.take_pools();
        for pool in pools {
            pool.close().await;
        }
        debug!(connection = %self.connection_string.masked(), "Pool closed");
    }
}

/// A connection checked out of a [`ConnectionPoolGuard`].
///
/// # Runtime Shutdown Behavior
///
/// The `Drop` implementation spawns a tokio task to hand the connection back.
/// If no runtime is available when `Drop` runs, the connection is dropped
/// without being returned to the driver. For critical cleanup paths, always use
/// `release().await` explicitly.
pub struct PooledConnection<D: Driver> {
    connection: Option<D::Connection>,
    driver: Arc<Mutex<D>>,
}

impl<D: Driver> std::fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("released", &self.connection.is_none())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> PooledConnection<D> {
    /// Borrow the live connection.
    pub fn get_mut(&mut self) -> DbResult<&mut D::Connection> {
        self.connection
            .as_mut()
            .ok_or_else(|| DbError::internal("Connection used after release"))
    }

    /// Hand the connection back to the pool (preferred over relying on Drop).
    pub async fn release(mut self) {
        if let Some(connection) = self.connection.take() {
            let mut driver = self.driver.lock().await;
            driver.release(connection).await;
            debug!("Connection released");
        }
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let driver = Arc::clone(&self.driver);
                handle.spawn(async move {
                    driver.lock().await.release(connection).await;
                    warn!("Connection released via Drop - consider using explicit release()");
                });
            }
            Err(_) => {
                warn!("Connection dropped outside of a runtime; it was not returned to the pool");
            }
        }
    }
}
