//! Database dispatch macros for reducing code duplication.
//!
//! This module provides declarative macros that generate backend-specific match
//! arms for the sqlx enums while maintaining linear readability. The macros
//! expand at compile time with zero runtime overhead.

/// Macro for generating backend dispatch match arms.
///
/// This macro generates match arms for the variants of a `db::sqlx_driver`
/// enum (`DbPool` or `SqlxConnection`), reducing the need to manually write
/// repetitive match statements.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(DbPool, pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($kind:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $crate::db::sqlx_driver::$kind::$variant($p) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
