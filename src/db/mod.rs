//! Database abstraction layer for stmt-runner.
//!
//! Provides a trait-based interface over an already-open connection handle
//! and the cursors it yields, allowing different database backends to be
//! used interchangeably by the statement runner.

mod cursor;
mod mock;
mod postgres;
mod sqlite;
mod types;

pub use mock::{FailingDatabaseClient, MockDatabaseClient};
pub use postgres::PostgresClient;
pub use sqlite::SqliteClient;
pub use types::{ResultTable, Row, Value};

use crate::config::ConnectionConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    Sqlite,
}

impl DatabaseBackend {
    /// Returns the backend as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Returns the default port for this backend (0 for file-based backends).
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Sqlite => 0,
        }
    }
}

/// Creates a database client for the given backend and configuration.
///
/// This is the central factory function for database connections. The
/// returned handle is owned by the caller; the statement runner only
/// borrows it.
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn DatabaseClient>> {
    match config.backend {
        DatabaseBackend::Postgres => {
            let client = PostgresClient::connect(config).await?;
            Ok(Box::new(client))
        }
        DatabaseBackend::Sqlite => {
            let client = SqliteClient::connect(config).await?;
            Ok(Box::new(client))
        }
    }
}

/// An open, reusable database handle.
///
/// All database operations are async and return Results with GatewayError.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Returns the backend this client talks to.
    fn backend(&self) -> DatabaseBackend;

    /// Executes `statements` verbatim and returns a cursor over the result.
    ///
    /// Execution failures (syntax errors, missing relations, connection
    /// faults) are reported here. Dropping the cursor releases everything
    /// it holds.
    async fn open_cursor<'a>(&'a self, statements: &'a str) -> Result<Box<dyn Cursor + 'a>>;

    /// Closes the database connection.
    async fn close(&self) -> Result<()>;
}

/// A row-by-row view over an executed result set.
#[async_trait]
pub trait Cursor: Send {
    /// Returns the result's column names in engine order.
    async fn columns(&mut self) -> Result<Vec<String>>;

    /// Returns the next decoded row, or `None` once the result is drained.
    async fn next_row(&mut self) -> Result<Option<Row>>;
}
