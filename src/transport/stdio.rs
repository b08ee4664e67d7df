//! Stdio transport for the datasource backend.
//!
//! Each line on stdin is one JSON request:
//! `{"method": "query_data" | "check_health", "params": {...}}`.
//! Each request is answered with one line on stdout, either `{"result": ...}`
//! or `{"error": "..."}`.

use crate::datasource::{DataSource, DriverFactory};
use crate::error::{DbError, DbResult};
use crate::models::{CheckHealthRequest, QueryDataRequest};
use crate::transport::{Transport, wait_for_signal};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
enum StdioRequest {
    QueryData(QueryDataRequest),
    CheckHealth(CheckHealthRequest),
}

/// Stdio transport implementation.
pub struct StdioTransport<F: DriverFactory> {
    datasource: Arc<DataSource<F>>,
}

impl<F: DriverFactory> StdioTransport<F> {
    pub fn new(datasource: Arc<DataSource<F>>) -> Self {
        Self { datasource }
    }
}

/// Answer one request line.
pub async fn handle_line<F: DriverFactory>(datasource: &DataSource<F>, line: &str) -> String {
    let request = match serde_json::from_str::<StdioRequest>(line) {
        Ok(request) => request,
        Err(e) => {
            let err = DbError::invalid_input(format!("Malformed request: {}", e));
            return json!({ "error": err.to_string() }).to_string();
        }
    };

    let result = match request {
        StdioRequest::QueryData(req) => datasource
            .query_data(&req)
            .await
            .and_then(|resp| serde_json::to_value(resp).map_err(encode_error)),
        StdioRequest::CheckHealth(req) => {
            serde_json::to_value(datasource.check_health(&req).await).map_err(encode_error)
        }
    };

    match result {
        Ok(value) => json!({ "result": value }).to_string(),
        Err(e) => json!({ "error": e.to_string() }).to_string(),
    }
}

fn encode_error(e: serde_json::Error) -> DbError {
    DbError::internal(format!("Failed to encode response: {}", e))
}

/// Serve requests until the reader is exhausted.
pub async fn serve<F, R, W>(datasource: &DataSource<F>, reader: R, mut writer: W) -> DbResult<()>
where
    F: DriverFactory,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.map_err(io_error)? {
        if line.trim().is_empty() {
            continue;
        }
        debug!(bytes = line.len(), "Request received");

        let mut response = handle_line(datasource, &line).await;
        response.push('\n');
        writer
            .write_all(response.as_bytes())
            .await
            .map_err(io_error)?;
        writer.flush().await.map_err(io_error)?;
    }
    Ok(())
}

fn io_error(e: std::io::Error) -> DbError {
    DbError::internal(format!("Stdio transport error: {}", e))
}

impl<F: DriverFactory> Transport for StdioTransport<F> {
    async fn run(&self) -> DbResult<()> {
        info!("Starting datasource backend with stdio transport");

        let reader = BufReader::new(tokio::io::stdin());
        let writer = tokio::io::stdout();

        let shutdown_requested = tokio::select! {
            result = serve(&self.datasource, reader, writer) => {
                match result {
                    Ok(()) => info!("Stdin closed, stdio transport completed normally"),
                    Err(e) => {
                        warn!(error = %e, "Stdio transport error");
                        self.datasource.shutdown().await;
                        return Err(e);
                    }
                }
                false
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                true
            }
        };

        if shutdown_requested {
            // Spawn a task to listen for second signal and force exit
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        info!("Closing datasource instances");
        self.datasource.shutdown().await;

        if shutdown_requested {
            // tokio::select! cannot interrupt the blocking stdin read
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}
