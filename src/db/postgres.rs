//! PostgreSQL database client implementation.
//!
//! Provides the `PostgresClient` struct that implements the `DatabaseClient` trait
//! for PostgreSQL databases using sqlx. Batches run over the simple query
//! protocol, so every value arrives in text format and is passed through as-is.

use crate::config::ConnectionConfig;
use crate::db::cursor::{batch_channel, column_names, AbandonHook, BatchTask, SqlxCursor};
use crate::db::{Cursor, DatabaseBackend, DatabaseClient, Value};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::{Connection, Executor, Row as SqlxRow, Statement, ValueRef};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL database client.
#[derive(Debug)]
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Wraps an existing connection pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to PostgreSQL, retrying transient failures with backoff.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let conn_str = config.to_connection_string()?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&conn_str)
                .await;

            match result {
                Ok(pool) => {
                    debug!("Successfully connected to database");
                    return Ok(Self { pool });
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    } else {
                        break;
                    }
                }
            }
        }

        match last_error {
            Some(e) => Err(map_connection_error(e, config)),
            None => Err(GatewayError::connection("No connection attempt was made")),
        }
    }

    /// Best-effort column names for a batch that produced no rows.
    ///
    /// Preparing the text describes a single statement without running it.
    /// Multi-statement text cannot be prepared and yields no names.
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
impl DatabaseClient for PostgresClient {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }

    async fn open_cursor<'a>(&'a self, statements: &'a str) -> Result<Box<dyn Cursor + 'a>> {
        let backend_pid = Arc::new(AtomicI32::new(0));
        let (task, stream, batch) =
            batch_channel::<Postgres>(Some(cancel_hook(&self.pool, &backend_pid)));
        tokio::spawn(run_batch(
            self.pool.clone(),
            statements.to_string(),
            backend_pid,
            task,
        ));

        let mut cursor =
            SqlxCursor::<Postgres>::open(stream, batch, decode_cell, format_query_error).await?;

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

/// Runs a batch on one pooled connection, publishing its backend pid first
/// so that an abandoned batch can be cancelled server-side.
///
/// A connection whose batch was abandoned is closed instead of being
/// returned to the pool.
async fn run_batch(
    pool: PgPool,
    statements: String,
    backend_pid: Arc<AtomicI32>,
    task: BatchTask<Postgres>,
) {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(e) => return task.fail(e).await,
    };

    match sqlx::query_scalar::<_, i32>("SELECT pg_backend_pid()")
        .fetch_one(&mut *conn)
        .await
    {
        Ok(pid) => backend_pid.store(pid, Ordering::SeqCst),
        Err(e) => return task.fail(e).await,
    }

    if !task.is_abandoned() {
        task.forward(sqlx::raw_sql(&statements).fetch_many(&mut *conn)).await;
    }

    if task.is_abandoned() {
        debug!("Closing connection of abandoned batch");
        if let Err(e) = conn.detach().close().await {
            debug!("Failed to close abandoned connection: {}", e);
        }
    }
}

/// Cancels the batch's statement through a separate, unpooled connection.
fn cancel_hook(pool: &PgPool, backend_pid: &Arc<AtomicI32>) -> AbandonHook {
    let options = pool.connect_options();
    let backend_pid = Arc::clone(backend_pid);

    Box::new(move || {
        let pid = backend_pid.load(Ordering::SeqCst);
        if pid == 0 {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to cancel backend {}", pid);
            return;
        };
        runtime.spawn(async move {
            match cancel_backend(&options, pid).await {
                Ok(()) => debug!("Cancelled statement on backend {}", pid),
                Err(e) => warn!("Failed to cancel backend {}: {}", pid, e),
            }
        });
    })
}

async fn cancel_backend(options: &PgConnectOptions, pid: i32) -> sqlx::Result<()> {
    let mut conn = PgConnection::connect_with(options).await?;
    sqlx::query("SELECT pg_cancel_backend($1)")
        .bind(pid)
        .execute(&mut conn)
        .await?;
    conn.close().await
}

/// Decodes one cell to NULL or the raw text the server sent.
fn decode_cell(row: &PgRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index).map_err(format_query_error)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let bytes = raw.as_bytes().map_err(|e| {
        GatewayError::query(format!("Failed to read column {}: {e}", column_label(row, index)))
    })?;
    Ok(Value::from_bytes(bytes))
}

fn column_label(row: &PgRow, index: usize) -> String {
    column_names(row)
        .into_iter()
        .nth(index)
        .unwrap_or_else(|| index.to_string())
}

/// Determines if an error is transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    // Connection refused or timeout are often transient
    if error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
    {
        return true;
    }

    // Authentication, missing database and TLS problems are not
    false
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, config: &ConnectionConfig) -> GatewayError {
    let host = config.host.as_deref().unwrap_or("localhost");
    let port = config.port;
    let user = config.user.as_deref().unwrap_or("unknown");
    let database = config.database.as_deref().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        GatewayError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        GatewayError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        GatewayError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        GatewayError::connection(format!("TLS negotiation with {host}:{port} failed: {error}"))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        GatewayError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        GatewayError::connection(error.to_string())
    }
}

/// Formats a query error with detail and hint lines if available.
fn format_query_error(error: sqlx::Error) -> GatewayError {
    let Some(db_error) = error.as_database_error() else {
        return GatewayError::query(error.to_string());
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }

        if let Some(table) = pg_error.table() {
            result.push_str("\n  TABLE: ");
            result.push_str(table);
        }

        if let Some(column) = pg_error.column() {
            result.push_str("\n  COLUMN: ");
            result.push_str(column);
        }

        if let Some(constraint) = pg_error.constraint() {
            result.push_str("\n  CONSTRAINT: ");
            result.push_str(constraint);
        }
    }

    GatewayError::query(result)
}
