//! PostgreSQL truncation and deadline integration tests.
//!
//! Tests that large results are truncated to the row limit while the true
//! row count is still reported, and that slow statements hit the deadline.

use sqlx::postgres::PgPoolOptions;
use std::time::{Duration, Instant};
use stmt_runner::config::ConnectionConfig;
use stmt_runner::db::{DatabaseClient, PostgresClient};
use stmt_runner::query::StatementRunner;

/// Helper to create a test client.
async fn get_test_client() -> Option<PostgresClient> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let config = ConnectionConfig::from_connection_string(&url).ok()?;
    PostgresClient::connect(&config).await.ok()
}

/// Scenario: Query with more rows than the limit
/// Given a query that returns 5000 rows
/// When it is run with max_rows = 1000
/// Then exactly 1000 rows are returned
/// And actual_rows is 5000
#[tokio::test]
async fn test_truncated_result_set() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let outcome = StatementRunner::new(&client)
        .run("SELECT generate_series(1, 5000) AS n", 1000)
        .await;

    assert_eq!(outcome.table().unwrap().rows.len(), 1000);
    assert_eq!(outcome.actual_rows(), 5000);

    let warning = outcome.truncation_warning().unwrap();
    assert!(warning.contains("1000 of 5000"));

    client.close().await.unwrap();
}

/// Scenario: Zero limit
/// Given a query that returns rows
/// When it is run with max_rows = 0
/// Then no rows are returned but the count is reported
#[tokio::test]
async fn test_zero_limit_still_counts() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let outcome = StatementRunner::new(&client)
        .run("SELECT generate_series(1, 20) AS n", 0)
        .await;

    assert!(outcome.table().unwrap().rows.is_empty());
    assert_eq!(outcome.actual_rows(), 20);

    client.close().await.unwrap();
}

/// Scenario: Statement slower than the deadline
/// Given a statement that sleeps for 5 seconds
/// When it is run with a 500ms deadline
/// Then a failure outcome is produced shortly after the deadline
/// And the connection can be reused afterwards
#[tokio::test]
async fn test_deadline_exceeded() {
    let Some(client) = get_test_client().await else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let runner = StatementRunner::new(&client).with_deadline(Duration::from_millis(500));

    for _ in 0..3 {
        let started = Instant::now();
        let outcome = runner.run("SELECT pg_sleep(5)", 10).await;

        assert_eq!(outcome.error_message(), Some("Query timed out after 500ms"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    let outcome = runner.run("SELECT 1", 10).await;
    assert_eq!(outcome.actual_rows(), 1);

    client.close().await.unwrap();
}

/// Scenario: Deadline on a single-connection pool
/// Given a pool holding exactly one connection
/// When a sleeping statement exceeds the deadline several times
/// Then each statement is cancelled on the server
/// And the next run on the same client succeeds within the deadline
#[tokio::test]
async fn test_deadline_cancels_statement_on_single_connection_pool() {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&url)
        .await
        .unwrap();
    let client = PostgresClient::from_pool(pool);
    let deadline = Duration::from_millis(500);
    let runner = StatementRunner::new(&client).with_deadline(deadline);

    for _ in 0..3 {
        let outcome = runner.run("SELECT pg_sleep(30)", 10).await;
        assert_eq!(outcome.error_message(), Some("Query timed out after 500ms"));
    }

    let started = Instant::now();
    let outcome = runner.run("SELECT 1", 10).await;
    assert!(outcome.is_success(), "{:?}", outcome.error_message());
    assert!(started.elapsed() < deadline);

    let sleeping = StatementRunner::new(&client)
        .run(
            "SELECT pid FROM pg_stat_activity \
             WHERE state = 'active' AND query = 'SELECT pg_sleep(30)'",
            10,
        )
        .await;
    assert_eq!(sleeping.actual_rows(), 0);

    client.close().await.unwrap();
}
