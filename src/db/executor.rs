//! Query execution engine.
//!
//! Runs one query model against a live connection and materializes the whole
//! result set into a [`Frame`]:
//! - Hidden queries short-circuit to an empty frame
//! - Column metadata is read before any row, so zero-row results keep typed columns
//! - The cursor is closed on every path once it is open
//!
//! A frame is only returned when every row was appended. Any scan failure
//! discards the rows read so far.

use crate::db::driver::{Connection, Cursor};
use crate::error::DbResult;
use crate::frame::{Frame, FrameBuilder, RESPONSE_FRAME_NAME};
use crate::models::QueryModel;
use std::time::Instant;
use tracing::{debug, warn};

/// Query executor that turns query models into frames.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    frame_name: String,
}

impl QueryExecutor {
    pub fn new() -> Self {
        Self {
            frame_name: RESPONSE_FRAME_NAME.to_string(),
        }
    }

    /// Run a query model on a connection.
    ///
    /// Driver errors are returned as-is; nothing is retried.
    pub async fn run<C>(&self, connection: &mut C, model: &QueryModel) -> DbResult<Frame>
    where
        C: Connection + ?Sized,
    {
        if model.hide {
            debug!("Query hidden, skipping execution");
            return Ok(Frame::empty(&self.frame_name));
        }

        let start = Instant::now();
        debug!(sql = %model.query_text, "Executing query");

        let mut cursor = connection.query(&model.query_text).await?;
        let result = self.materialize(cursor.as_mut()).await;

        if let Err(e) = cursor.close().await {
            warn!(error = %e, "Failed to close cursor");
        }

        let frame = result?.with_executed_query(&model.query_text);

        debug!(
            rows = frame.row_count(),
            columns = frame.column_count(),
            execution_time_ms = start.elapsed().as_millis() as u64,
            "Query executed"
        );

        Ok(frame)
    }

    /// Read column metadata, then every row, into a new frame.
    async fn materialize(&self, cursor: &mut (dyn Cursor + '_)) -> DbResult<Frame> {
        let columns = cursor.columns()?;
        let mut builder = FrameBuilder::new(&self.frame_name, &columns);

        while let Some(row) = cursor.next_row().await? {
            builder.append_row(row)?;
        }

        Ok(builder.finish())
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}
