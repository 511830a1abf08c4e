//! Mock database clients for testing.
//!
//! `MockDatabaseClient` serves a scripted result and counts the cursors it
//! hands out, so tests can check that every cursor is released.

use super::{Cursor, DatabaseBackend, DatabaseClient, ResultTable, Row, Value};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Leading keywords the mock accepts as SQL when no result is scripted.
const KNOWN_VERBS: &[&str] = &[
    "SELECT", "WITH", "VALUES", "SHOW", "EXPLAIN", "INSERT", "UPDATE", "DELETE", "CREATE",
    "DROP", "ALTER", "SET", "BEGIN", "COMMIT", "ROLLBACK", "PRAGMA",
];

/// A mock database client that returns predefined results.
#[derive(Debug, Default)]
pub struct MockDatabaseClient {
    result: Option<ResultTable>,
    open_error: Option<String>,
    row_error: Option<(usize, String)>,
    open_delay: Duration,
    row_delay: Duration,
    open_cursors: Arc<AtomicUsize>,
    cursors_opened: Arc<AtomicUsize>,
}

impl MockDatabaseClient {
    /// Creates a mock that answers SELECTs with a single echo row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `table` for every batch.
    pub fn with_result(mut self, table: ResultTable) -> Self {
        self.result = Some(table);
        self
    }

    /// Serves a single column `n` holding the values `1..=count`.
    pub fn with_rows(self, count: usize) -> Self {
        let rows = (1..=count).map(|i| vec![Value::Text(i.to_string())]).collect();
        self.with_result(ResultTable::new(vec!["n".to_string()], rows))
    }

    /// Fails every batch at execution time.
    pub fn failing_on_open(mut self, message: impl Into<String>) -> Self {
        self.open_error = Some(message.into());
        self
    }

    /// Fails while fetching the row at zero-based `index`.
    pub fn failing_at_row(mut self, index: usize, message: impl Into<String>) -> Self {
        self.row_error = Some((index, message.into()));
        self
    }

    /// Delays execution before the cursor is returned.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Delays every row fetch.
    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = delay;
        self
    }

    /// Number of cursors currently alive.
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Number of cursors handed out since creation.
    pub fn cursors_opened(&self) -> usize {
        self.cursors_opened.load(Ordering::SeqCst)
    }

    fn scripted_result(&self, sql: &str) -> Result<ResultTable> {
        if let Some(table) = &self.result {
            return Ok(table.clone());
        }

        let trimmed = sql.trim();
        let Some(verb) = trimmed.split_whitespace().next() else {
            return Ok(ResultTable::default());
        };

        let verb = verb.trim_end_matches(';').to_uppercase();
        if !KNOWN_VERBS.contains(&verb.as_str()) {
            return Err(GatewayError::query(format!(
                "syntax error at or near \"{}\"",
                verb.to_lowercase()
            )));
        }

        if verb == "SELECT" {
            Ok(ResultTable::new(
                vec!["result".to_string()],
                vec![vec![Value::Text(format!("Mock result for: {trimmed}"))]],
            ))
        } else {
            Ok(ResultTable::default())
        }
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    async fn open_cursor<'a>(&'a self, statements: &'a str) -> Result<Box<dyn Cursor + 'a>> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        if let Some(message) = &self.open_error {
            return Err(GatewayError::query(message.clone()));
        }

        let table = self.scripted_result(statements)?;
        Ok(Box::new(MockCursor {
            columns: table.column_names,
            rows: table.rows.into_iter(),
            position: 0,
            row_error: self.row_error.clone(),
            row_delay: self.row_delay,
            _guard: CursorGuard::acquire(&self.open_cursors, &self.cursors_opened),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Tracks a live mock cursor; released on drop.
#[derive(Debug)]
struct CursorGuard(Arc<AtomicUsize>);

impl CursorGuard {
    fn acquire(open: &Arc<AtomicUsize>, total: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        total.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(open))
    }
}

impl Drop for CursorGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockCursor {
    columns: Vec<String>,
    rows: std::vec::IntoIter<Row>,
    position: usize,
    row_error: Option<(usize, String)>,
    row_delay: Duration,
    _guard: CursorGuard,
}

#[async_trait]
impl Cursor for MockCursor {
    async fn columns(&mut self) -> Result<Vec<String>> {
        Ok(self.columns.clone())
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        if !self.row_delay.is_zero() {
            tokio::time::sleep(self.row_delay).await;
        }

        if let Some((index, message)) = &self.row_error {
            if *index == self.position {
                return Err(GatewayError::query(message.clone()));
            }
        }

        self.position += 1;
        Ok(self.rows.next())
    }
}

/// A database client whose every execution fails.
#[derive(Debug, Clone)]
pub struct FailingDatabaseClient {
    message: String,
}

impl FailingDatabaseClient {
    /// Creates a client failing with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl DatabaseClient for FailingDatabaseClient {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    async fn open_cursor<'a>(&'a self, _statements: &'a str) -> Result<Box<dyn Cursor + 'a>> {
        Err(GatewayError::connection(self.message.clone()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
