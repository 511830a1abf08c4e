//! stmt-runner - run a batch of SQL statements and print the result as JSON.

mod cli;

use std::time::Duration;

use cli::Cli;
use stmt_runner::api::RunResponse;
use stmt_runner::config::{Config, ConnectionConfig};
use stmt_runner::db::{self, DatabaseClient, MockDatabaseClient};
use stmt_runner::error::{GatewayError, Result};
use stmt_runner::logging;
use stmt_runner::query::StatementRunner;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging::init_stderr_logging();

    if let Err(e) = run().await {
        error!("{}: {}", e.category(), e.message());
        std::process::exit(exit_code(&e));
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse_args();

    let config_path = cli.config_path();
    debug!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    let request = cli.read_request(config.runner.default_max_rows)?;
    let deadline = cli
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.runner.deadline());

    let db: Box<dyn DatabaseClient> = if cli.mock_db {
        info!("Using mock database");
        Box::new(MockDatabaseClient::new())
    } else {
        let conn = resolve_connection(&cli, &config)?.ok_or_else(|| {
            GatewayError::config(
                "No database connection configured. Use --help for usage information.",
            )
        })?;
        info!("Connection: {}", conn.display_string());
        db::connect(&conn).await?
    };

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling execution");
                cancel.cancel();
            }
        })
    };

    let outcome = StatementRunner::new(db.as_ref())
        .with_deadline(deadline)
        .with_cancellation(cancel)
        .run(&request.statements, request.max_rows)
        .await;
    ctrl_c.abort();

    if let Some(warning) = outcome.truncation_warning() {
        info!("{}", warning);
    }

    if let Err(e) = db.close().await {
        warn!("Failed to close connection: {}", e);
    }

    let response = RunResponse::from(outcome);
    println!("{}", response.to_json(cli.pretty)?);

    Ok(())
}

/// Resolves the final connection configuration from CLI args, config file, and environment.
///
/// A connection string stands alone. Individual CLI flags are layered over
/// the named (or default) connection from the config file.
fn resolve_connection(cli: &Cli, config: &Config) -> Result<Option<ConnectionConfig>> {
    let from_cli = cli.to_connection_config()?;

    let mut connection = if cli.connection_string.is_some() {
        from_cli
    } else {
        let named = match cli.connection_name() {
            Some(name) => Some(config.get_connection(Some(name)).cloned().ok_or_else(|| {
                GatewayError::config(format!("Connection '{}' not found in config file", name))
            })?),
            None => config.get_connection(None).cloned(),
        };

        match (named, from_cli) {
            (Some(mut base), Some(overrides)) => {
                base.merge(&overrides);
                Some(base)
            }
            (named, from_cli) => named.or(from_cli),
        }
    };

    if let Some(ref mut conn) = connection {
        conn.apply_env_defaults();
    }

    Ok(connection)
}

/// Exit status for errors that prevented a response. 2 marks a bad request.
fn exit_code(error: &GatewayError) -> i32 {
    match error {
        GatewayError::InvalidRequest(_) => 2,
        _ => 1,
    }
}
