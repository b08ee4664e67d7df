//! HTTP transport for the datasource backend.
//!
//! Exposes the two host operations as JSON endpoints:
//! - `POST /api/query` takes a `QueryDataRequest`
//! - `POST /api/health` takes a `CheckHealthRequest`

use crate::datasource::{DataSource, DriverFactory};
use crate::error::{DbError, DbResult};
use crate::models::{CheckHealthRequest, CheckHealthResult, QueryDataRequest, QueryDataResponse};
use crate::transport::{Transport, wait_for_signal};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const QUERY_PATH: &str = "/api/query";
pub const HEALTH_PATH: &str = "/api/health";

/// HTTP transport implementation.
pub struct HttpTransport<F: DriverFactory> {
    datasource: Arc<DataSource<F>>,
    /// Host to bind to
    host: String,
    /// Port to bind to
    port: u16,
}

impl<F: DriverFactory> HttpTransport<F> {
    /// Create a new HTTP transport.
    ///
    /// # Arguments
    ///
    /// * `datasource` - Shared datasource backend
    /// * `host` - Host address to bind to
    /// * `port` - Port to bind to
    pub fn new(datasource: Arc<DataSource<F>>, host: impl Into<String>, port: u16) -> Self {
        Self {
            datasource,
            host: host.into(),
            port,
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Build the router serving the datasource endpoints.
pub fn router<F: DriverFactory>(datasource: Arc<DataSource<F>>) -> Router {
    Router::new()
        .route(QUERY_PATH, post(query_data::<F>))
        .route(HEALTH_PATH, post(check_health::<F>))
        .with_state(datasource)
}

pub async fn query_data<F: DriverFactory>(
    State(datasource): State<Arc<DataSource<F>>>,
    Json(request): Json<QueryDataRequest>,
) -> Result<Json<QueryDataResponse>, DbError> {
    let response = datasource.query_data(&request).await?;
    Ok(Json(response))
}

pub async fn check_health<F: DriverFactory>(
    State(datasource): State<Arc<DataSource<F>>>,
    Json(request): Json<CheckHealthRequest>,
) -> Json<CheckHealthResult> {
    Json(datasource.check_health(&request).await)
}

impl<F: DriverFactory> Transport for HttpTransport<F> {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting datasource backend with HTTP transport on {}", bind_addr);

        let app = router(Arc::clone(&self.datasource));

        // Create TCP listener
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;

        info!(query = QUERY_PATH, health = HEALTH_PATH, "Endpoints ready");

        // Long-running queries may keep the server alive,
        // so we force exit after a timeout once shutdown signal is received
        const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        // Race between: server completing normally vs forced timeout/second signal after shutdown
        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for requests to finish (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        info!("Closing datasource instances");
        self.datasource.shutdown().await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
