//! End-to-end runner tests against an in-memory SQLite database.
//!
//! These run without any external services.

use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};
use stmt_runner::api::{RunRequest, RunResponse};
use stmt_runner::db::{SqliteClient, Value};
use stmt_runner::query::StatementRunner;

/// Produces the integers 1..=n in column `n`.
fn series(n: usize) -> String {
    format!(
        "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < {n}) \
         SELECT n FROM seq"
    )
}

async fn seeded_client() -> SqliteClient {
    let client = SqliteClient::in_memory().await.unwrap();
    let outcome = StatementRunner::new(&client)
        .run(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL, name TEXT); \
             INSERT INTO users (email, name) VALUES \
                ('alice@example.com', 'Alice'), \
                ('bob@example.com', 'Bob'), \
                ('carol@example.com', NULL);",
            0,
        )
        .await;
    assert!(outcome.is_success(), "seed failed: {:?}", outcome.error_message());
    client
}

#[tokio::test]
async fn test_select_literal_and_null() {
    let client = SqliteClient::in_memory().await.unwrap();
    let outcome = StatementRunner::new(&client).run("SELECT 1, NULL", 10).await;

    let table = outcome.table().unwrap();
    assert_eq!(table.column_names, vec!["1", "NULL"]);
    assert_eq!(table.rows, vec![vec![Value::from("1"), Value::Null]]);
    assert_eq!(outcome.actual_rows(), 1);
}

#[tokio::test]
async fn test_truncation_reports_true_count() {
    let client = SqliteClient::in_memory().await.unwrap();
    let outcome = StatementRunner::new(&client).run(&series(5000), 1000).await;

    let table = outcome.table().unwrap();
    assert_eq!(table.rows.len(), 1000);
    assert_eq!(table.rows[0], vec![Value::from("1")]);
    assert_eq!(table.rows[999], vec![Value::from("1000")]);
    assert_eq!(outcome.actual_rows(), 5000);
    assert!(outcome.was_truncated());
}

#[tokio::test]
async fn test_limit_above_row_count_returns_everything() {
    let client = SqliteClient::in_memory().await.unwrap();

    for max_rows in [25, 26, 10_000] {
        let outcome = StatementRunner::new(&client).run(&series(25), max_rows).await;
        assert_eq!(outcome.table().unwrap().rows.len(), 25);
        assert_eq!(outcome.actual_rows(), 25);
        assert!(!outcome.was_truncated());
    }
}

#[tokio::test]
async fn test_non_positive_limit_returns_no_rows() {
    let client = SqliteClient::in_memory().await.unwrap();

    for max_rows in [0, -1] {
        let outcome = StatementRunner::new(&client).run(&series(40), max_rows).await;
        let table = outcome.table().unwrap();
        assert_eq!(table.column_names, vec!["n"]);
        assert!(table.rows.is_empty());
        assert_eq!(outcome.actual_rows(), 40);
    }
}

#[tokio::test]
async fn test_rows_align_with_columns() {
    let client = seeded_client().await;
    let outcome = StatementRunner::new(&client)
        .run("SELECT id, email, name FROM users ORDER BY id", 100)
        .await;

    let table = outcome.table().unwrap();
    assert_eq!(table.column_names, vec!["id", "email", "name"]);
    assert!(table.rows.iter().all(|row| row.len() == table.width()));
    assert_eq!(
        table.rows[2],
        vec![Value::from("3"), Value::from("carol@example.com"), Value::Null]
    );
}

#[tokio::test]
async fn test_duplicate_column_names_are_kept() {
    let client = SqliteClient::in_memory().await.unwrap();
    let outcome = StatementRunner::new(&client)
        .run("SELECT 1 AS a, 2 AS a", 10)
        .await;

    assert_eq!(outcome.table().unwrap().column_names, vec!["a", "a"]);
}

#[tokio::test]
async fn test_invalid_sql_is_a_failure_outcome() {
    let client = SqliteClient::in_memory().await.unwrap();
    let outcome = StatementRunner::new(&client).run("not sql", 10).await;

    assert!(!outcome.is_success());
    assert!(!outcome.error_message().unwrap().is_empty());
    assert!(outcome.table().is_none());
    assert_eq!(outcome.actual_rows(), 0);
    assert!(outcome.stats().elapsed_ms() >= 0);
}

#[tokio::test]
async fn test_missing_table_is_a_failure_outcome() {
    let client = seeded_client().await;
    let outcome = StatementRunner::new(&client)
        .run("SELECT * FROM nonexistent_table_xyz", 10)
        .await;

    assert!(outcome
        .error_message()
        .unwrap()
        .contains("no such table: nonexistent_table_xyz"));
}

#[tokio::test]
async fn test_blank_statements_are_delegated() {
    let client = SqliteClient::in_memory().await.unwrap();

    for statements in ["", "   \n\t"] {
        let outcome = StatementRunner::new(&client).run(statements, 10).await;
        let table = outcome.table().unwrap();
        assert!(table.column_names.is_empty());
        assert!(table.rows.is_empty());
        assert_eq!(outcome.actual_rows(), 0);
    }
}

#[tokio::test]
async fn test_empty_result_keeps_column_names() {
    let client = seeded_client().await;
    let outcome = StatementRunner::new(&client)
        .run("SELECT id, email FROM users WHERE 1 = 0", 10)
        .await;

    let table = outcome.table().unwrap();
    assert_eq!(table.column_names, vec!["id", "email"]);
    assert!(table.rows.is_empty());
}

#[tokio::test]
async fn test_deadline_abandons_unbounded_scan() {
    let client = SqliteClient::in_memory().await.unwrap();
    let deadline = Duration::from_millis(300);
    let runner = StatementRunner::new(&client).with_deadline(deadline);
    let endless = "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq) \
                   SELECT n FROM seq";

    for _ in 0..3 {
        let started = Instant::now();
        let outcome = runner.run(endless, 10).await;

        assert_eq!(outcome.error_message(), Some("Query timed out after 300ms"));
        assert_eq!(outcome.actual_rows(), 0);
        assert!(started.elapsed() < deadline + Duration::from_secs(2));
    }

    // The single pooled connection was released by every timed-out scan.
    let outcome = runner.run("SELECT 1", 10).await;
    assert_eq!(outcome.actual_rows(), 1);
}

#[tokio::test]
async fn test_deadline_interrupts_rowless_statement() {
    let client = SqliteClient::in_memory().await.unwrap();
    let deadline = Duration::from_millis(300);
    let runner = StatementRunner::new(&client).with_deadline(deadline);
    let endless_count = "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq) \
                         SELECT count(*) FROM seq";

    for _ in 0..3 {
        let started = Instant::now();
        let outcome = runner.run(endless_count, 10).await;

        assert_eq!(outcome.error_message(), Some("Query timed out after 300ms"));
        assert!(started.elapsed() < deadline + Duration::from_secs(2));
    }

    // The interrupted statement gave the only connection back.
    let started = Instant::now();
    let outcome = runner.run("SELECT 1", 10).await;
    assert!(outcome.is_success(), "{:?}", outcome.error_message());
    assert_eq!(outcome.actual_rows(), 1);
    assert!(started.elapsed() < deadline);
}

#[tokio::test]
async fn test_batch_returns_first_statement_result() {
    let client = SqliteClient::in_memory().await.unwrap();
    let outcome = StatementRunner::new(&client)
        .run("SELECT 1 AS a WHERE 0; SELECT 2 AS b", 10)
        .await;

    let table = outcome.table().unwrap();
    assert_eq!(table.column_names, vec!["a"]);
    assert!(table.rows.is_empty());
    assert_eq!(outcome.actual_rows(), 0);
}

#[tokio::test]
async fn test_later_statements_still_run() {
    let client = seeded_client().await;
    let outcome = StatementRunner::new(&client)
        .run(
            "SELECT count(*) AS before FROM users; \
             INSERT INTO users (email) VALUES ('dave@example.com')",
            10,
        )
        .await;
    assert_eq!(outcome.table().unwrap().rows, vec![vec![Value::from("3")]]);

    let outcome = StatementRunner::new(&client)
        .run("SELECT count(*) FROM users", 10)
        .await;
    assert_eq!(outcome.table().unwrap().rows, vec![vec![Value::from("4")]]);
}

#[tokio::test]
async fn test_response_shape() {
    let client = SqliteClient::in_memory().await.unwrap();
    let request = RunRequest::from_json(r#"{"statements": "SELECT 1, NULL", "max_rows": 10}"#)
        .unwrap();

    let outcome = StatementRunner::new(&client)
        .run(&request.statements, request.max_rows)
        .await;
    let response = RunResponse::from(outcome);

    assert_eq!(response.error_msg, "");
    assert_eq!(response.column_names, Some(vec!["1".to_string(), "NULL".to_string()]));
    assert_eq!(response.rows, Some(vec![vec![Value::from("1"), Value::Null]]));
    assert_eq!(response.actual_rows, 1);

    let failed = RunResponse::from(StatementRunner::new(&client).run("not sql", 10).await);
    assert!(!failed.error_msg.is_empty());
    assert_eq!(failed.column_names, None);
    assert_eq!(failed.rows, None);
    assert_eq!(failed.actual_rows, 0);
}
