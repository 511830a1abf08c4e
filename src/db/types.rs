//! Result table types for stmt-runner.
//!
//! Defines the structures used to represent scanned results. Cells carry no
//! database typing: a value is either NULL or its raw textual rendering.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A column-named, row-major result table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    /// Column names in engine-reported order. Names may repeat.
    pub column_names: Vec<String>,

    /// Rows, each positionally aligned with `column_names`.
    pub rows: Vec<Row>,
}

impl ResultTable {
    /// Creates a table with the given columns and rows.
    pub fn new(column_names: Vec<String>, rows: Vec<Row>) -> Self {
        Self { column_names, rows }
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the number of columns.
    pub fn width(&self) -> usize {
        self.column_names.len()
    }
}

/// A row of data from a result set.
pub type Row = Vec<Value>;

/// A single cell value.
///
/// Serializes as JSON `null` or a JSON string.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    #[default]
    Null,

    /// Raw textual rendering of a non-null value.
    Text(String),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Builds a value from raw bytes, replacing invalid UTF-8 sequences.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Value::Text(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Returns a display string, rendering NULL as `NULL`.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}
