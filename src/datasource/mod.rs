//! Datasource backend.
//!
//! Resolves the calling datasource instance from the plugin context and serves
//! the two host operations: `query_data` and `check_health`.

pub mod instance;
pub mod service;

pub use instance::{DataSourceInstance, DriverFactory, InstanceManager, SqlxDriverFactory};
pub use service::DataSource;
