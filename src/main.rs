//! Datasource backend - Main entry point.
//!
//! Serves dashboard queries against SQL databases (PostgreSQL, MySQL, SQLite)
//! and returns their results as typed columnar frames.

use db_frame_datasource::config::{Config, TransportMode};
use db_frame_datasource::datasource::{DataSource, SqlxDriverFactory};
use db_frame_datasource::transport::{HttpTransport, StdioTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs always go to stderr; stdout carries stdio transport responses.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    if config.enable_logs {
        init_tracing(&config);
    }

    let pool_options = config.pool_options()?;

    info!(
        transport = %config.transport,
        "Starting db-frame-datasource v{}",
        env!("CARGO_PKG_VERSION")
    );

    let datasource = Arc::new(DataSource::new(SqlxDriverFactory::new(pool_options)));

    // Run the appropriate transport
    let result = match config.transport {
        TransportMode::Stdio => {
            info!("Using stdio transport");
            let transport = StdioTransport::new(datasource);
            transport.run().await
        }
        TransportMode::Http => {
            info!(
                bind = %config.http_bind_addr(),
                "Using HTTP transport"
            );
            let transport = HttpTransport::new(datasource, &config.http_host, config.http_port);
            transport.run().await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
