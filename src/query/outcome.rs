//! Outcome of a statement run.

use std::time::Duration;

use crate::db::ResultTable;

/// Timing and row statistics reported with every outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    /// Wall-clock time from execution start to the end of the scan.
    pub elapsed: Duration,

    /// Rows the engine produced before truncation. Always 0 on failure.
    pub actual_rows: usize,
}

impl ExecutionStats {
    /// Elapsed time in whole milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        i64::try_from(self.elapsed.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Result of running a batch: a table or a failure message, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The batch executed and its result was scanned.
    Success {
        table: ResultTable,
        stats: ExecutionStats,
    },
    /// Execution or scanning failed.
    Failure {
        message: String,
        stats: ExecutionStats,
    },
}

impl ExecutionOutcome {
    /// Returns true for the success branch.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the statistics of either branch.
    pub fn stats(&self) -> &ExecutionStats {
        match self {
            Self::Success { stats, .. } | Self::Failure { stats, .. } => stats,
        }
    }

    /// Returns the (possibly truncated) table on success.
    pub fn table(&self) -> Option<&ResultTable> {
        match self {
            Self::Success { table, .. } => Some(table),
            Self::Failure { .. } => None,
        }
    }

    /// Returns the failure message.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { message, .. } => Some(message),
        }
    }

    /// Rows produced before truncation.
    pub fn actual_rows(&self) -> usize {
        self.stats().actual_rows
    }

    /// Returns true if fewer rows were returned than the engine produced.
    pub fn was_truncated(&self) -> bool {
        match self {
            Self::Success { table, stats } => table.rows.len() < stats.actual_rows,
            Self::Failure { .. } => false,
        }
    }

    /// Returns a truncation warning message if the result was truncated.
    pub fn truncation_warning(&self) -> Option<String> {
        let table = self.table().filter(|_| self.was_truncated())?;
        Some(format!(
            "Result truncated: showing {} of {} rows",
            table.rows.len(),
            self.actual_rows()
        ))
    }
}
