//! sqlx-backed driver.
//!
//! This module implements the driver traits on top of database-specific sqlx
//! pools (MySqlPool, PgPool, SqlitePool) to ensure full type support.
//!
//! One pool is created lazily per [`LifetimeHint`], so health checks recycle
//! their connections without affecting the pool that serves queries.

use crate::config::PoolOptions;
use crate::db::driver::{
    ColumnDescriptor, Connection, Cursor, Driver, LifetimeHint, PoolHandle, Statement,
};
use crate::db::types::{self, RawRow, driver_type_tag};
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{ConnectionKeywords, ConnectionString, DatabaseType};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use sqlx::pool::PoolConnection;
use sqlx::{
    Column as _, Executor as _, MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool,
    Statement as _, TypeInfo as _, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    postgres::PgConnectOptions, postgres::PgPoolOptions, sqlite::SqliteConnectOptions,
    sqlite::SqlitePoolOptions,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySql,
            DbPool::Postgres(_) => DatabaseType::Postgres,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Configured acquire timeout.
    pub fn acquire_timeout(&self) -> Duration {
        impl_db_dispatch!(DbPool, self, {
            MySql(pool) => pool.options().get_acquire_timeout(),
            Postgres(pool) => pool.options().get_acquire_timeout(),
            SQLite(pool) => pool.options().get_acquire_timeout(),
        })
    }
}

#[async_trait]
impl PoolHandle for DbPool {
    type Connection = SqlxConnection;

    async fn checkout(&self) -> DbResult<SqlxConnection> {
        let result = impl_db_dispatch!(DbPool, self, {
            MySql(pool) => pool.acquire().await.map(SqlxConnection::MySql),
            Postgres(pool) => pool.acquire().await.map(SqlxConnection::Postgres),
            SQLite(pool) => pool.acquire().await.map(SqlxConnection::SQLite),
        });
        result.map_err(|e| acquire_error(self.db_type(), self.acquire_timeout(), e))
    }

    async fn close(&self) {
        impl_db_dispatch!(DbPool, self, {
            MySql(pool) => pool.close().await,
            Postgres(pool) => pool.close().await,
            SQLite(pool) => pool.close().await,
        })
    }
}

/// A connection checked out of a [`DbPool`].
///
/// Dropping it returns it to its pool.
#[derive(Debug)]
pub enum SqlxConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

/// Driver serving one datasource instance.
#[derive(Debug)]
pub struct SqlxDriver {
    db_type: DatabaseType,
    pool_options: PoolOptions,
    pools: HashMap<LifetimeHint, DbPool>,
}

impl SqlxDriver {
    pub fn new(db_type: DatabaseType, pool_options: PoolOptions) -> Self {
        Self {
            db_type,
            pool_options,
            pools: HashMap::new(),
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Number of pools created so far.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Get the pool for a lifetime hint, creating it on first use.
    ///
    /// Pools connect lazily, so this never waits on the network.
    fn pool_for(
        &mut self,
        connection_string: &ConnectionString,
        hint: LifetimeHint,
    ) -> DbResult<DbPool> {
        if let Some(pool) = self.pools.get(&hint) {
            return Ok(pool.clone());
        }

        info!(
            db_type = %self.db_type,
            connection = %connection_string.masked(),
            lifetime = %hint,
            "Creating connection pool"
        );

        let pool = self.create_pool(&connection_string.keywords(), hint)?;
        self.pools.insert(hint, pool.clone());
        Ok(pool)
    }

    /// Create a connection pool for the given keywords.
    fn create_pool(&self, keywords: &ConnectionKeywords, hint: LifetimeHint) -> DbResult<DbPool> {
        let pool_opts = &self.pool_options;
        let is_sqlite = self.db_type == DatabaseType::SQLite;
        let acquire_timeout = Duration::from_secs(pool_opts.acquire_timeout_or_default());
        let idle_timeout = Some(Duration::from_secs(pool_opts.idle_timeout_or_default()));
        let max_lifetime = hint.max_lifetime();

        let pool = match self.db_type {
            DatabaseType::MySql => DbPool::MySql(
                MySqlPoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .max_lifetime(max_lifetime)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_lazy_with(mysql_options(keywords)?),
            ),
            DatabaseType::Postgres => DbPool::Postgres(
                PgPoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .max_lifetime(max_lifetime)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_lazy_with(postgres_options(keywords)?),
            ),
            DatabaseType::SQLite => DbPool::SQLite(
                SqlitePoolOptions::new()
                    .min_connections(pool_opts.min_connections_or_default())
                    .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .max_lifetime(max_lifetime)
                    .test_before_acquire(pool_opts.test_before_acquire_or_default())
                    .connect_lazy_with(sqlite_options(keywords)?),
            ),
        };
        Ok(pool)
    }
}

/// Map a failed checkout, keeping the pool's own acquire timeout in the message.
fn acquire_error(db_type: DatabaseType, acquire_timeout: Duration, error: sqlx::Error) -> DbError {
    match error {
        sqlx::Error::PoolTimedOut => DbError::timeout(
            "connection pool acquire",
            u32::try_from(acquire_timeout.as_secs()).unwrap_or(u32::MAX),
        ),
        sqlx::Error::PoolClosed => DbError::from(error),
        error => DbError::connection(
            format!("Failed to connect: {}", error),
            connection_suggestion(db_type, &error),
        ),
    }
}

#[async_trait]
impl Driver for SqlxDriver {
    type Connection = SqlxConnection;
    type Pool = DbPool;

    async fn pool(
        &mut self,
        connection_string: &ConnectionString,
        hint: LifetimeHint,
    ) -> DbResult<DbPool> {
        self.pool_for(connection_string, hint)
    }

    async fn release(&mut self, connection: SqlxConnection) {
        // Returned to its pool on drop
        drop(connection);
    }

    fn take_pools(&mut self) -> Vec<DbPool> {
        self.pools
            .drain()
            .map(|(hint, pool)| {
                debug!(lifetime = %hint, db_type = %pool.db_type(), "Closing connection pool");
                pool
            })
            .collect()
    }
}

// =============================================================================
// Connect Options
// =============================================================================

fn port(keywords: &ConnectionKeywords) -> DbResult<Option<u16>> {
    let port = keywords.port.trim();
    if port.is_empty() {
        return Ok(None);
    }
    port.parse()
        .map(Some)
        .map_err(|_| DbError::settings(format!("Invalid port '{}'", keywords.port)))
}

fn postgres_options(keywords: &ConnectionKeywords) -> DbResult<PgConnectOptions> {
    let mut options = PgConnectOptions::new();
    if !keywords.hostname.is_empty() {
        options = options.host(&keywords.hostname);
    }
    if let Some(port) = port(keywords)? {
        options = options.port(port);
    }
    if !keywords.database.is_empty() {
        options = options.database(&keywords.database);
    }
    if !keywords.uid.is_empty() {
        options = options.username(&keywords.uid);
    }
    if !keywords.pwd.is_empty() {
        options = options.password(&keywords.pwd);
    }
    Ok(options)
}

fn mysql_options(keywords: &ConnectionKeywords) -> DbResult<MySqlConnectOptions> {
    let mut options = MySqlConnectOptions::new().charset("utf8mb4");
    if !keywords.hostname.is_empty() {
        options = options.host(&keywords.hostname);
    }
    if let Some(port) = port(keywords)? {
        options = options.port(port);
    }
    if !keywords.database.is_empty() {
        options = options.database(&keywords.database);
    }
    if !keywords.uid.is_empty() {
        options = options.username(&keywords.uid);
    }
    if !keywords.pwd.is_empty() {
        options = options.password(&keywords.pwd);
    }
    Ok(options)
}

/// SQLite uses the database keyword as the file path; host and credentials are ignored.
fn sqlite_options(keywords: &ConnectionKeywords) -> DbResult<SqliteConnectOptions> {
    if keywords.database.is_empty() {
        return Err(DbError::settings("SQLite requires a database file path"));
    }
    Ok(SqliteConnectOptions::new()
        .filename(&keywords.database)
        .create_if_missing(false))
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the user and password of the datasource".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match db_type {
        DatabaseType::SQLite => {
            "Verify the database file path exists and is accessible".to_string()
        }
        _ => format!(
            "Verify the datasource host and port (default port {})",
            db_type.default_port().unwrap_or_default()
        ),
    }
}

// =============================================================================
// Statements and Cursors
// =============================================================================

/// Describe result columns from prepared statement metadata.
fn describe<C: sqlx::Column>(columns: &[C]) -> Vec<ColumnDescriptor> {
    columns
        .iter()
        .map(|col| ColumnDescriptor::new(col.name(), driver_type_tag(col.type_info().name())))
        .collect()
}

#[async_trait]
impl Connection for SqlxConnection {
    async fn prepare<'c>(&'c mut self, sql: &'c str) -> DbResult<Box<dyn Statement<'c> + 'c>> {
        let columns = impl_db_dispatch!(SqlxConnection, &mut *self, {
            MySql(conn) => {
                let statement = (&mut **conn).prepare(sql).await?;
                describe(statement.columns())
            },
            Postgres(conn) => {
                let statement = (&mut **conn).prepare(sql).await?;
                describe(statement.columns())
            },
            SQLite(conn) => {
                let statement = (&mut **conn).prepare(sql).await?;
                describe(statement.columns())
            },
        });

        Ok(Box::new(SqlxStatement {
            connection: self,
            sql,
            columns,
        }))
    }
}

struct SqlxStatement<'c> {
    connection: &'c mut SqlxConnection,
    sql: &'c str,
    columns: Vec<ColumnDescriptor>,
}

#[async_trait]
impl<'c> Statement<'c> for SqlxStatement<'c> {
    async fn query(self: Box<Self>) -> DbResult<Box<dyn Cursor + 'c>> {
        let SqlxStatement {
            connection,
            sql,
            columns,
        } = *self;

        impl_db_dispatch!(SqlxConnection, connection, {
            MySql(conn) => {
                let rows = sqlx::query(sql).fetch(&mut **conn);
                open_cursor(rows, columns, types::mysql::decode_row).await
            },
            Postgres(conn) => {
                let rows = sqlx::query(sql).fetch(&mut **conn);
                open_cursor(rows, columns, types::postgres::decode_row).await
            },
            SQLite(conn) => {
                let rows = sqlx::query(sql).fetch(&mut **conn);
                open_cursor(rows, columns, types::sqlite::decode_row).await
            },
        })
    }
}

type RowDecoder<R> = fn(&R, &[ColumnDescriptor]) -> Result<RawRow, sqlx::Error>;

/// Start the row stream.
///
/// The first row is fetched eagerly so that execution errors surface here
/// rather than as a failure on the first row.
async fn open_cursor<'c, R: Send + 'c>(
    mut rows: BoxStream<'c, Result<R, sqlx::Error>>,
    columns: Vec<ColumnDescriptor>,
    decode: RowDecoder<R>,
) -> DbResult<Box<dyn Cursor + 'c>> {
    let pending = rows.try_next().await?;
    Ok(Box::new(SqlxCursor {
        exhausted: pending.is_none(),
        columns,
        rows,
        pending,
        decode,
        next_index: 0,
    }))
}

struct SqlxCursor<'c, R> {
    columns: Vec<ColumnDescriptor>,
    rows: BoxStream<'c, Result<R, sqlx::Error>>,
    pending: Option<R>,
    decode: RowDecoder<R>,
    next_index: usize,
    exhausted: bool,
}

#[async_trait]
impl<'c, R: Send + 'c> Cursor for SqlxCursor<'c, R> {
    fn columns(&self) -> DbResult<Vec<ColumnDescriptor>> {
        Ok(self.columns.clone())
    }

    async fn next_row(&mut self) -> DbResult<Option<RawRow>> {
        let row = match self.pending.take() {
            Some(row) => row,
            None if self.exhausted => return Ok(None),
            None => match self.rows.try_next().await? {
                Some(row) => row,
                None => {
                    self.exhausted = true;
                    return Ok(None);
                }
            },
        };

        let index = self.next_index;
        self.next_index += 1;
        (self.decode)(&row, &self.columns)
            .map(Some)
            .map_err(|e| DbError::scan(index, e.to_string()))
    }

    async fn close(self: Box<Self>) -> DbResult<()> {
        // Dropping the stream releases the connection borrow; sqlx drains any
        // unread rows before the connection runs its next statement.
        drop(self);
        Ok(())
    }
}
