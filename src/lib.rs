//! db-frame-datasource library
//!
//! This library runs SQL queries against pooled database connections and
//! materializes their results as typed columnar frames for a dashboard host.

pub mod config;
pub mod datasource;
pub mod db;
pub mod error;
pub mod frame;
pub mod models;
pub mod transport;

pub use config::Config;
pub use datasource::DataSource;
pub use error::DbError;
pub use frame::Frame;
