//! Query and health check handlers.

use crate::datasource::instance::{DriverFactory, InstanceManager};
use crate::db::{LifetimeHint, QueryExecutor};
use crate::error::DbResult;
use crate::frame::{Frame, RESPONSE_FRAME_NAME};
use crate::models::{
    CheckHealthRequest, CheckHealthResult, DataResponse, QueryDataRequest, QueryDataResponse,
    QueryModel,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Datasource backend: resolves instances and serves `query_data` and `check_health`.
pub struct DataSource<F: DriverFactory> {
    instances: InstanceManager<F>,
    executor: QueryExecutor,
}

impl<F: DriverFactory> DataSource<F> {
    pub fn new(factory: F) -> Self {
        Self {
            instances: InstanceManager::new(factory),
            executor: QueryExecutor::new(),
        }
    }

    pub fn instances(&self) -> &InstanceManager<F> {
        &self.instances
    }

    /// Run a batch of queries.
    ///
    /// One connection serves the whole batch and queries run on it in order.
    /// Each query gets its own response; a failing query never affects its
    /// siblings. Only a failure to resolve the datasource fails the whole call.
    pub async fn query_data(&self, request: &QueryDataRequest) -> DbResult<QueryDataResponse> {
        let instance = self
            .instances
            .get(&request.plugin_context)
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to resolve datasource instance"))?;

        let start = Instant::now();
        let models: Vec<(&str, DbResult<QueryModel>)> = request
            .queries
            .iter()
            .map(|q| (q.ref_id.as_str(), q.query_model()))
            .collect();

        let needs_connection = models
            .iter()
            .any(|(_, model)| matches!(model, Ok(m) if !m.hide));

        let mut connection = if needs_connection {
            Some(instance.pool().acquire(LifetimeHint::NoRecycling).await)
        } else {
            None
        };

        if let Some(Err(e)) = &connection {
            warn!(uid = %instance.uid(), error = %e, "Failed to acquire connection");
        }

        let mut response = QueryDataResponse::new();
        for (ref_id, model) in models {
            let result = match model {
                Err(e) => Err(e),
                Ok(model) => match connection.as_mut() {
                    Some(Ok(pooled)) => match pooled.get_mut() {
                        Ok(conn) => self.executor.run(conn, &model).await,
                        Err(e) => Err(e),
                    },
                    Some(Err(e)) if !model.hide => Err(e.clone()),
                    // Hidden queries never need the connection
                    _ => Ok(Frame::empty(RESPONSE_FRAME_NAME)),
                },
            };

            if let Err(e) = &result {
                debug!(ref_id = %ref_id, error = %e, "Query failed");
            }
            response
                .responses
                .insert(ref_id.to_string(), DataResponse::from_result(result));
        }

        if let Some(Ok(pooled)) = connection {
            pooled.release().await;
        }

        info!(
            uid = %instance.uid(),
            queries = response.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query batch complete"
        );

        Ok(response)
    }

    /// Check that the datasource can serve queries.
    ///
    /// Every failure, including an unresolvable datasource, is reported as an
    /// ERROR status rather than as an error.
    pub async fn check_health(&self, request: &CheckHealthRequest) -> CheckHealthResult {
        let instance = match self.instances.get(&request.plugin_context).await {
            Ok(instance) => instance,
            Err(e) => {
                warn!(error = %e, "Failed to resolve datasource instance");
                return CheckHealthResult::error(e.to_string());
            }
        };

        debug!(
            uid = %instance.uid(),
            statement = %instance.probe().statement(),
            "Running health check"
        );
        instance.probe().check(instance.pool()).await
    }

    /// Dispose every datasource instance.
    pub async fn shutdown(&self) {
        self.instances.dispose_all().await;
    }
}
