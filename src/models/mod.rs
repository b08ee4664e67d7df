//! Data models for the datasource backend.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;

// Re-export commonly used types
pub use connection::{
    ConnectionKeywords, ConnectionString, DataSourceInstanceSettings, DataSourceOptions,
    DatabaseType, PluginContext,
};
pub use query::{
    CheckHealthRequest, CheckHealthResult, DataQuery, DataResponse, HealthStatus,
    QueryDataRequest, QueryDataResponse, QueryModel,
};
