//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Driver traits and the sqlx-backed driver
//! - Serialized connection pool access
//! - Query execution into frames
//! - Health probing
//! - Type mappings
//! - Database dispatch macros for reducing code duplication

pub mod driver;
pub mod executor;
pub mod health;
#[macro_use]
pub mod macros;
pub mod pool;
pub mod sqlx_driver;
pub mod types;

pub use driver::{
    ColumnDescriptor, Connection, Cursor, Driver, HEALTH_CHECK_LIFETIME, LifetimeHint, PoolHandle,
    Statement,
};
pub use executor::QueryExecutor;
pub use health::HealthProbe;
pub use pool::{ConnectionPoolGuard, PooledConnection};
pub use sqlx_driver::{DbPool, SqlxConnection, SqlxDriver};
pub use types::{ElementType, RawRow, RawValue, canonical_type};
