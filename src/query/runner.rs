//! Statement execution under a deadline.
//!
//! `StatementRunner` executes an arbitrary batch against a borrowed
//! connection handle, scans the result into text cells, truncates it to the
//! requested row limit and reports timing. Execution failures are returned
//! as data; nothing here panics or raises past `run`.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::outcome::{ExecutionOutcome, ExecutionStats};
use crate::db::{DatabaseClient, ResultTable, Row};
use crate::error::{GatewayError, Result};

/// Deadline applied when none is configured.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Upper bound on up-front row allocation, whatever the limit.
const MAX_PREALLOCATED_ROWS: usize = 1024;

/// Runs statement batches against a database client.
pub struct StatementRunner<'a> {
    db: &'a dyn DatabaseClient,
    deadline: Duration,
    cancel: Option<CancellationToken>,
}

impl<'a> StatementRunner<'a> {
    /// Creates a runner with the default deadline.
    pub fn new(db: &'a dyn DatabaseClient) -> Self {
        Self {
            db,
            deadline: DEFAULT_DEADLINE,
            cancel: None,
        }
    }

    /// Sets the deadline for execute + scan.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Abandons the run when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Returns the configured deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Executes `statements` and returns at most `max_rows` rows.
    ///
    /// A `max_rows` of zero or less returns no rows; the reported row count
    /// is always the untruncated one.
    pub async fn run(&self, statements: &str, max_rows: i64) -> ExecutionOutcome {
        let limit = row_limit(max_rows);

        let start = Instant::now();
        let scanned = self.scan_bounded(statements, limit).await;
        let elapsed = start.elapsed();

        match scanned {
            Ok(scan) => {
                if scan.total > scan.rows.len() {
                    debug!(
                        "Result truncated: returning {} of {} rows",
                        scan.rows.len(),
                        scan.total
                    );
                }

                ExecutionOutcome::Success {
                    table: ResultTable::new(scan.column_names, scan.rows),
                    stats: ExecutionStats {
                        elapsed,
                        actual_rows: scan.total,
                    },
                }
            }
            Err(e) => {
                warn!(
                    statements = %statements,
                    error = %e,
                    "Failed to execute user input statements"
                );

                ExecutionOutcome::Failure {
                    message: e.message().to_string(),
                    stats: ExecutionStats {
                        elapsed,
                        actual_rows: 0,
                    },
                }
            }
        }
    }

    /// Scans under the deadline and, if set, the cancellation token.
    ///
    /// Whichever fires first drops the scan future and with it the cursor.
    async fn scan_bounded(&self, statements: &str, limit: usize) -> Result<Scan> {
        let deadline = self.deadline;
        let timed = async {
            tokio::time::timeout(deadline, scan(self.db, statements, limit))
                .await
                .map_err(|_| {
                    GatewayError::timeout(format!(
                        "Query timed out after {}",
                        format_duration(deadline)
                    ))
                })?
        };

        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(GatewayError::cancelled("Query was cancelled")),
                result = timed => result,
            },
            None => timed.await,
        }
    }
}

/// Rows kept from a scan plus the number of rows seen.
struct Scan {
    column_names: Vec<String>,
    rows: Vec<Row>,
    total: usize,
}

/// Opens a cursor and drains it, keeping the first `limit` rows.
///
/// The cursor lives only inside this function, so it is released on every
/// return, including when the enclosing future is dropped.
async fn scan(db: &dyn DatabaseClient, statements: &str, limit: usize) -> Result<Scan> {
    let mut cursor = db.open_cursor(statements).await?;
    let column_names = cursor.columns().await?;

    let mut rows = Vec::with_capacity(limit.min(MAX_PREALLOCATED_ROWS));
    let mut total = 0usize;

    while let Some(row) = cursor.next_row().await? {
        if row.len() != column_names.len() {
            return Err(GatewayError::query(format!(
                "Row {} has {} values but the result has {} columns",
                total + 1,
                row.len(),
                column_names.len()
            )));
        }

        if rows.len() < limit {
            rows.push(row);
        }
        total += 1;
    }

    Ok(Scan {
        column_names,
        rows,
        total,
    })
}

/// Non-positive limits mean "no rows".
fn row_limit(max_rows: i64) -> usize {
    usize::try_from(max_rows).unwrap_or(0)
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}
