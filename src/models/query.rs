//! Query-related data models.
//!
//! This module defines the request and response types exchanged with the host for
//! data queries and health checks.

use crate::error::{DbError, DbResult};
use crate::frame::Frame;
use crate::models::PluginContext;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// The unit of work submitted by a caller: raw SQL plus a visibility flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryModel {
    #[serde(default)]
    pub hide: bool,
    #[serde(default)]
    pub query_text: String,
}

impl QueryModel {
    /// Create a visible query.
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            hide: false,
            query_text: query_text.into(),
        }
    }

    /// Create a hidden query.
    pub fn hidden(query_text: impl Into<String>) -> Self {
        Self {
            hide: true,
            query_text: query_text.into(),
        }
    }
}

/// One query of a batch, tagged with the caller's identifier.
///
/// The query model fields sit next to `refId` in the same JSON object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQuery {
    #[serde(rename = "refId")]
    pub ref_id: String,
    #[serde(flatten)]
    pub model: serde_json::Map<String, JsonValue>,
}

impl DataQuery {
    /// Build a query from a ref id and a query model.
    pub fn new(ref_id: impl Into<String>, model: &QueryModel) -> Self {
        let model = match serde_json::to_value(model) {
            Ok(JsonValue::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            ref_id: ref_id.into(),
            model,
        }
    }

    /// Build a query from an arbitrary JSON model, which may not decode.
    pub fn from_json(ref_id: impl Into<String>, model: serde_json::Map<String, JsonValue>) -> Self {
        Self {
            ref_id: ref_id.into(),
            model,
        }
    }

    /// Decode the query model.
    pub fn query_model(&self) -> DbResult<QueryModel> {
        serde_json::from_value(JsonValue::Object(self.model.clone())).map_err(|e| {
            DbError::invalid_input(format!("Invalid query model for '{}': {}", self.ref_id, e))
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDataRequest {
    #[serde(default)]
    pub plugin_context: PluginContext,
    #[serde(default)]
    pub queries: Vec<DataQuery>,
}

/// Outcome of one query: frames on success, an error message otherwise.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DataResponse {
    pub frames: Vec<Frame>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DataResponse {
    /// Build a response from a single query result. Errors carry no frames.
    pub fn from_result(result: DbResult<Frame>) -> Self {
        match result {
            Ok(frame) => Self {
                frames: vec![frame],
                error: None,
            },
            Err(e) => Self::from_error(&e),
        }
    }

    /// Build an error response.
    pub fn from_error(error: &DbError) -> Self {
        Self {
            frames: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    /// Check if this response carries an error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Responses keyed by the caller's ref ids.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryDataResponse {
    pub responses: BTreeMap<String, DataResponse>,
}

impl QueryDataResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the response for a ref id.
    pub fn get(&self, ref_id: &str) -> Option<&DataResponse> {
        self.responses.get(ref_id)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckHealthRequest {
    #[serde(default)]
    pub plugin_context: PluginContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckHealthResult {
    pub status: HealthStatus,
    pub message: String,
}

impl CheckHealthResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            message: message.into(),
        }
    }
}
