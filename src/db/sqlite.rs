//! SQLite database client implementation.
//!
//! Cells are read through SQLite's own text conversion, so integers and
//! reals come back exactly as the `sqlite3` shell would print them.

use crate::config::ConnectionConfig;
use crate::db::cursor::{batch_channel, BatchTask, Execution, SqlxCursor};
use crate::db::{Cursor, DatabaseBackend, DatabaseClient, Value};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Executor, Row as SqlxRow, Statement};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Virtual machine steps between checks for an abandoned batch.
const PROGRESS_CHECK_INTERVAL: i32 = 1000;

/// SQLite database client.
#[derive(Debug)]
pub struct SqliteClient {
    pool: SqlitePool,
}

impl SqliteClient {
    /// Opens the database file named by the config, creating it if missing.
    ///
    /// The pool holds a single long-lived connection so that `:memory:`
    /// databases keep their contents between calls.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;
        let options = SqliteConnectOptions::from_str(&conn_str)
            .map_err(|e| GatewayError::config(format!("Invalid database path: {e}")))?
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|e| GatewayError::connection(format!("Failed to open {conn_str}: {e}")))?;

        debug!("Opened SQLite database {}", conn_str);
        Ok(Self { pool })
    }

    /// Opens a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let config = ConnectionConfig::from_connection_string("sqlite::memory:")?;
        Self::connect(&config).await
    }

    async fn describe_columns(&self, statements: &str) -> Vec<String> {
        if statements.trim().is_empty() {
            return Vec::new();
        }

        match self.pool.prepare(statements).await {
            Ok(statement) => statement
                .columns()
                .iter()
                .map(|c| sqlx::Column::name(c).to_string())
                .collect(),
            Err(e) => {
                debug!("Could not describe rowless result: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl DatabaseClient for SqliteClient {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Sqlite
    }

    async fn open_cursor<'a>(&'a self, statements: &'a str) -> Result<Box<dyn Cursor + 'a>> {
        let (task, stream, batch) = batch_channel::<Sqlite>(None);
        tokio::spawn(run_batch(self.pool.clone(), statements.to_string(), task));

        let mut cursor =
            SqlxCursor::<Sqlite>::open(stream, batch, decode_cell, map_query_error).await?;

        if cursor.is_rowless() {
            cursor.set_columns(self.describe_columns(statements).await);
        }

        Ok(Box::new(cursor))
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Runs a batch on one pooled connection.
///
/// A progress handler aborts the running statement once the cursor is
/// dropped, so an abandoned batch gives the connection back promptly.
async fn run_batch(pool: SqlitePool, statements: String, task: BatchTask<Sqlite>) {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return task.fail(e).await,
    };

    if let Err(e) = install_interrupt(&mut conn, task.execution()).await {
        return task.fail(e).await;
    }

    task.forward(sqlx::raw_sql(&statements).fetch_many(&mut *conn)).await;

    if task.is_abandoned() {
        debug!("Interrupted abandoned SQLite batch");
    }

    match conn.lock_handle().await {
        Ok(mut handle) => handle.remove_progress_handler(),
        Err(e) => debug!("Could not remove progress handler: {}", e),
    };
}

async fn install_interrupt(
    conn: &mut SqliteConnection,
    execution: Arc<Execution>,
) -> sqlx::Result<()> {
    let mut handle = conn.lock_handle().await?;
    handle.set_progress_handler(PROGRESS_CHECK_INTERVAL, move || !execution.is_abandoned());
    Ok(())
}

/// Decodes one cell to NULL or SQLite's text rendering of the value.
fn decode_cell(row: &SqliteRow, index: usize) -> Result<Value> {
    let bytes: Option<Vec<u8>> = row.try_get_unchecked(index).map_err(map_query_error)?;
    Ok(bytes.map_or(Value::Null, |b| Value::from_bytes(&b)))
}

fn map_query_error(error: sqlx::Error) -> GatewayError {
    match error.as_database_error() {
        Some(db_error) => GatewayError::query(db_error.message().to_string()),
        None => GatewayError::query(error.to_string()),
    }
}
