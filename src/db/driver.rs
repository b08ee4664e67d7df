//! Driver abstraction.
//!
//! The frame pipeline only talks to a database through these traits:
//! a [`Driver`] hands out [`Connection`]s, a connection prepares [`Statement`]s,
//! and executing a statement opens a [`Cursor`] over its rows. The sqlx-backed
//! implementation lives in [`crate::db::sqlx_driver`].

use crate::db::types::RawRow;
use crate::error::DbResult;
use crate::models::ConnectionString;
use async_trait::async_trait;
use std::time::Duration;

/// Recycling lifetime used for health check connections.
pub const HEALTH_CHECK_LIFETIME: Duration = Duration::from_secs(60);

/// Connection recycling policy passed through to the pool unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifetimeHint {
    /// Connections live until the pool drops them.
    #[default]
    NoRecycling,
    /// Connections are recycled once they are older than the duration.
    RecycleAfter(Duration),
}

impl LifetimeHint {
    /// Maximum connection lifetime for pool configuration.
    pub fn max_lifetime(&self) -> Option<Duration> {
        match self {
            Self::NoRecycling => None,
            Self::RecycleAfter(d) => Some(*d),
        }
    }
}

impl std::fmt::Display for LifetimeHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRecycling => write!(f, "SetConnMaxLifetime=0"),
            Self::RecycleAfter(d) => write!(f, "SetConnMaxLifetime={}", d.as_secs()),
        }
    }
}

/// Name and driver type tag of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub driver_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, driver_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver_type: driver_type.into(),
        }
    }
}

/// A backend serving one datasource instance.
///
/// The driver only does bookkeeping: it resolves the pool for a lifetime hint
/// and takes connections back. Callers serialize these calls through
/// [`crate::db::pool::ConnectionPoolGuard`], so none of them may wait for a
/// connection to become free. Waiting happens in [`PoolHandle::checkout`],
/// outside the guard lock.
#[async_trait]
pub trait Driver: Send + 'static {
    type Connection: Connection;
    type Pool: PoolHandle<Connection = Self::Connection>;

    /// Resolve the pool serving `hint`, creating it on first use.
    async fn pool(
        &mut self,
        connection_string: &ConnectionString,
        hint: LifetimeHint,
    ) -> DbResult<Self::Pool>;

    /// Return a connection to its pool.
    async fn release(&mut self, connection: Self::Connection);

    /// Detach every pool. The caller closes them once the guard lock is released.
    fn take_pools(&mut self) -> Vec<Self::Pool>;
}

/// A cloneable handle to one connection pool.
#[async_trait]
pub trait PoolHandle: Clone + Send + Sync + 'static {
    type Connection: Connection;

    /// Check a connection out, waiting while the pool is exhausted.
    async fn checkout(&self) -> DbResult<Self::Connection>;

    /// Close the pool. Waits until checked-out connections have been returned.
    async fn close(&self);
}

/// A live connection, used by one query at a time.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Prepare a statement and describe its result columns.
    async fn prepare<'c>(&'c mut self, sql: &'c str) -> DbResult<Box<dyn Statement<'c> + 'c>>;

    /// Prepare and execute in one step.
    async fn query<'c>(&'c mut self, sql: &'c str) -> DbResult<Box<dyn Cursor + 'c>> {
        let statement = self.prepare(sql).await?;
        statement.query().await
    }
}

/// A prepared statement borrowing its connection.
#[async_trait]
pub trait Statement<'c>: Send {
    /// Execute the statement and open a cursor over its rows.
    async fn query(self: Box<Self>) -> DbResult<Box<dyn Cursor + 'c>>;
}

/// An open result set.
///
/// Cursors must be closed with [`Cursor::close`] once the caller is done with
/// them, whether or not every row was read.
#[async_trait]
pub trait Cursor: Send {
    /// Column metadata, in result order.
    fn columns(&self) -> DbResult<Vec<ColumnDescriptor>>;

    /// Fetch the next row, `None` once the result set is exhausted.
    async fn next_row(&mut self) -> DbResult<Option<RawRow>>;

    async fn close(self: Box<Self>) -> DbResult<()>;
}
