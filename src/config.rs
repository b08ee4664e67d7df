//! Configuration handling for the datasource backend.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use clap::{Parser, ValueEnum};

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connection pool configuration options shared by every datasource instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Transport mode for the datasource backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// JSON lines over standard input/output (for a supervising host process)
    #[default]
    Stdio,
    /// JSON over HTTP
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Configuration for the datasource backend.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-frame-datasource",
    about = "Datasource backend that runs SQL queries and returns typed columnar frames",
    version,
    author
)]
pub struct Config {
    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "DATASOURCE_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_HTTP_HOST,
        env = "DATASOURCE_HTTP_HOST"
    )]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport)
    #[arg(
        long,
        default_value_t = DEFAULT_HTTP_PORT,
        env = "DATASOURCE_HTTP_PORT"
    )]
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DATASOURCE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DATASOURCE_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable logging output (logs go to stderr; stdout is reserved for the stdio transport)
    #[arg(long, env = "DATASOURCE_ENABLE_LOGS")]
    pub enable_logs: bool,

    /// Maximum connections per pool (default: 10, 1 for SQLite)
    #[arg(long, env = "DATASOURCE_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,

    /// Minimum connections per pool (default: 1)
    #[arg(long, env = "DATASOURCE_MIN_CONNECTIONS")]
    pub min_connections: Option<u32>,

    /// Idle timeout for pooled connections in seconds (default: 600)
    #[arg(long, env = "DATASOURCE_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Connection acquire timeout in seconds (default: 30)
    #[arg(long, env = "DATASOURCE_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: Option<u64>,

    /// Test connections before handing them out (default: true)
    #[arg(long, env = "DATASOURCE_TEST_BEFORE_ACQUIRE")]
    pub test_before_acquire: Option<bool>,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            log_level: "info".to_string(),
            json_logs: false,
            enable_logs: false,
            max_connections: None,
            min_connections: None,
            idle_timeout: None,
            acquire_timeout: None,
            test_before_acquire: None,
        }
    }

    /// Gather and validate the pool options.
    pub fn pool_options(&self) -> Result<PoolOptions, String> {
        let options = PoolOptions {
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            idle_timeout_secs: self.idle_timeout,
            acquire_timeout_secs: self.acquire_timeout,
            test_before_acquire: self.test_before_acquire,
        };
        options.validate()?;
        Ok(options)
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport, TransportMode::Stdio);
        assert_eq!(config.http_host, DEFAULT_HTTP_HOST);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.pool_options().unwrap(), PoolOptions::default());
    }

    #[test]
    fn test_http_bind_addr() {
        let config = Config {
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
            ..Config::default()
        };
        assert_eq!(config.http_bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_parse_cli_arguments() {
        let config = Config::try_parse_from([
            "db-frame-datasource",
            "--transport",
            "http",
            "--http-port",
            "9000",
            "--max-connections",
            "4",
            "--test-before-acquire",
            "false",
        ])
        .unwrap();
        assert_eq!(config.transport, TransportMode::Http);
        assert_eq!(config.http_port, 9000);

        let options = config.pool_options().unwrap();
        assert_eq!(options.max_connections, Some(4));
        assert!(!options.test_before_acquire_or_default());
    }

    #[test]
    fn test_pool_defaults() {
        let options = PoolOptions::default();
        assert_eq!(options.max_connections_or_default(false), DEFAULT_MAX_CONNECTIONS);
        assert_eq!(
            options.max_connections_or_default(true),
            DEFAULT_MAX_CONNECTIONS_SQLITE
        );
        assert_eq!(options.min_connections_or_default(), DEFAULT_MIN_CONNECTIONS);
        assert_eq!(options.idle_timeout_or_default(), DEFAULT_IDLE_TIMEOUT_SECS);
        assert_eq!(
            options.acquire_timeout_or_default(),
            DEFAULT_ACQUIRE_TIMEOUT_SECS
        );
        assert!(options.test_before_acquire_or_default());
    }

    #[test]
    fn test_pool_validation() {
        let zero_max = PoolOptions {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(zero_max.validate().is_err());

        let min_above_max = PoolOptions {
            max_connections: Some(2),
            min_connections: Some(5),
            ..Default::default()
        };
        let err = min_above_max.validate().unwrap_err();
        assert!(err.contains("cannot exceed"));

        let ok = PoolOptions {
            max_connections: Some(5),
            min_connections: Some(2),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_invalid_pool_options_rejected_by_config() {
        let config = Config {
            min_connections: Some(0),
            ..Config::default()
        };
        assert!(config.pool_options().is_err());
    }
}
