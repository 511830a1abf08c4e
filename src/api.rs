//! Request and response shapes at the gateway boundary.
//!
//! These mirror the JSON bodies of the run endpoint: field names are
//! snake_case and failures travel inside a normal response.

use serde::{Deserialize, Serialize};

use crate::db::Row;
use crate::error::{GatewayError, Result};
use crate::query::ExecutionOutcome;

/// A batch of statements to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Statement text, passed to the engine verbatim.
    pub statements: String,

    /// Maximum rows to return. Missing means 0.
    #[serde(default)]
    pub max_rows: i64,
}

impl RunRequest {
    /// Creates a request.
    pub fn new(statements: impl Into<String>, max_rows: i64) -> Self {
        Self {
            statements: statements.into(),
            max_rows,
        }
    }

    /// Parses a JSON request body.
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| GatewayError::invalid_request(e.to_string()))
    }
}

/// The response to a run. An empty `error_msg` means success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub error_msg: String,
    pub column_names: Option<Vec<String>>,
    pub rows: Option<Vec<Row>>,
    pub execution_ms: i64,
    pub actual_rows: usize,
}

impl RunResponse {
    /// Returns true if the run succeeded.
    pub fn is_success(&self) -> bool {
        self.error_msg.is_empty()
    }

    /// Serializes the response as JSON.
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        json.map_err(|e| GatewayError::internal(format!("Failed to serialize response: {e}")))
    }
}

impl From<ExecutionOutcome> for RunResponse {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Success { table, stats } => Self {
                error_msg: String::new(),
                column_names: Some(table.column_names),
                rows: Some(table.rows),
                execution_ms: stats.elapsed_ms(),
                actual_rows: stats.actual_rows,
            },
            ExecutionOutcome::Failure { message, stats } => Self {
                error_msg: message,
                column_names: None,
                rows: None,
                execution_ms: stats.elapsed_ms(),
                actual_rows: 0,
            },
        }
    }
}
