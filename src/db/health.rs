//! Datasource health probe.
//!
//! Runs a fixed statement that returns the backend's current timestamp. Every
//! stage that can fail (acquire, prepare, execute, columns, scan) turns into an
//! ERROR result naming that stage.

use crate::db::driver::{Connection, Cursor, Driver, HEALTH_CHECK_LIFETIME, LifetimeHint};
use crate::db::pool::ConnectionPoolGuard;
use crate::error::{DbError, DbResult};
use crate::models::{CheckHealthResult, DatabaseType};
use tracing::{debug, warn};

/// Statement used when no dialect is known.
pub const DEFAULT_HEALTH_CHECK_SQL: &str = "select current timestamp from sysibm.sysdummy1";

#[derive(Debug, Clone)]
pub struct HealthProbe {
    statement: String,
}

impl HealthProbe {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
        }
    }

    /// Probe using the backend's own current timestamp statement.
    pub fn for_database(db_type: DatabaseType) -> Self {
        Self::new(db_type.health_check_sql())
    }

    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// Check that the pool can serve a query.
    ///
    /// Never fails; failures are reported through the result status.
    pub async fn check<D: Driver>(&self, pool: &ConnectionPoolGuard<D>) -> CheckHealthResult {
        match self.probe(pool).await {
            Ok(timestamp) => {
                debug!(timestamp = %timestamp, "Health check passed");
                CheckHealthResult::ok(format!(
                    "Check successful; current timestamp = {}",
                    timestamp
                ))
            }
            Err(e) => {
                warn!(error = %e, "Health check failed");
                CheckHealthResult::error(e.to_string())
            }
        }
    }

    async fn probe<D: Driver>(&self, pool: &ConnectionPoolGuard<D>) -> DbResult<String> {
        let mut connection = pool
            .acquire(LifetimeHint::RecycleAfter(HEALTH_CHECK_LIFETIME))
            .await
            .map_err(|e| DbError::health_check("acquire", e.to_string()))?;

        let result = match connection.get_mut() {
            Ok(conn) => self.read_timestamp(conn).await,
            Err(e) => Err(e),
        };

        connection.release().await;
        result
    }

    async fn read_timestamp<C: Connection>(&self, connection: &mut C) -> DbResult<String> {
        let statement = connection
            .prepare(&self.statement)
            .await
            .map_err(|e| DbError::health_check("prepare", e.to_string()))?;

        let mut cursor = statement
            .query()
            .await
            .map_err(|e| DbError::health_check("execute", e.to_string()))?;

        let result = first_value(cursor.as_mut()).await;

        if let Err(e) = cursor.close().await {
            warn!(error = %e, "Failed to close health check cursor");
        }
        result
    }
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_CHECK_SQL)
    }
}

/// Read the first column of the first row as text.
async fn first_value(cursor: &mut (dyn Cursor + '_)) -> DbResult<String> {
    let columns = cursor
        .columns()
        .map_err(|e| DbError::health_check("columns", e.to_string()))?;
    if columns.is_empty() {
        return Err(DbError::health_check("columns", "statement returned no columns"));
    }

    let row = cursor
        .next_row()
        .await
        .map_err(|e| DbError::health_check("scan", e.to_string()))?
        .ok_or_else(|| DbError::health_check("scan", "statement returned no rows"))?;

    row.into_iter()
        .next()
        .and_then(|value| value.to_text())
        .ok_or_else(|| DbError::health_check("scan", "current timestamp was NULL"))
}
