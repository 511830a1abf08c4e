//! Cursor over a sqlx raw-SQL result stream.
//!
//! Shared by the PostgreSQL and SQLite clients. Each batch runs in its own
//! task on a pooled connection and hands its items to the cursor through a
//! bounded channel. The backend supplies how a single cell is decoded, how
//! driver errors are rendered and how an abandoned batch is interrupted.

use super::{Cursor, Row, Value};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::{Column, Database, Either, Row as SqlxRow};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Items produced by `RawSql::fetch_many`: a statement summary or a row.
pub(crate) type RawItem<DB> = std::result::Result<
    Either<<DB as Database>::QueryResult, <DB as Database>::Row>,
    sqlx::Error,
>;

/// A stream of raw items.
pub(crate) type RawStream<'a, DB> = BoxStream<'a, RawItem<DB>>;

/// Decodes the cell at `index` of a driver row.
pub(crate) type CellDecoder<DB> = fn(&<DB as Database>::Row, usize) -> Result<Value>;

/// Renders a driver error as a gateway error.
pub(crate) type ErrorMapper = fn(sqlx::Error) -> GatewayError;

/// Runs once when a batch is abandoned before it finished.
pub(crate) type AbandonHook = Box<dyn FnOnce() + Send>;

/// Items buffered between the batch task and its cursor.
const BATCH_CHANNEL_CAPACITY: usize = 64;

/// State shared by a cursor and the task running its batch.
#[derive(Debug, Default)]
pub(crate) struct Execution {
    abandoned: AtomicBool,
    finished: AtomicBool,
}

impl Execution {
    /// True once the cursor side gave up on the batch.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Marks the batch abandoned. Returns true if it was still running.
    fn abandon(&self) -> bool {
        self.abandoned.store(true, Ordering::SeqCst);
        !self.finished.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// Task side of a batch: forwards driver items to the cursor.
///
/// Dropping it marks the batch finished and closes the channel, in that
/// order, so a cursor that reads to the end never sees a running batch.
pub(crate) struct BatchTask<DB: Database> {
    tx: mpsc::Sender<RawItem<DB>>,
    execution: Arc<Execution>,
}

impl<DB: Database> BatchTask<DB> {
    /// Returns the shared execution state.
    pub(crate) fn execution(&self) -> Arc<Execution> {
        Arc::clone(&self.execution)
    }

    /// True once the cursor side gave up on the batch.
    pub(crate) fn is_abandoned(&self) -> bool {
        self.execution.is_abandoned()
    }

    /// Forwards every item of `stream`, stopping once the cursor is gone.
    pub(crate) async fn forward(&self, mut stream: RawStream<'_, DB>) {
        while let Some(item) = stream.next().await {
            if self.tx.send(item).await.is_err() {
                debug!("Cursor dropped, stopping batch");
                break;
            }
        }
    }

    /// Reports an error that prevented the batch from starting.
    pub(crate) async fn fail(&self, error: sqlx::Error) {
        let _ = self.tx.send(Err(error)).await;
    }
}

impl<DB: Database> Drop for BatchTask<DB> {
    fn drop(&mut self) {
        self.execution.finish();
    }
}

/// Cursor side of a batch. Dropping it before the batch finished runs the
/// abandon hook.
pub(crate) struct BatchHandle {
    execution: Arc<Execution>,
    on_abandon: Option<AbandonHook>,
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        if self.execution.abandon() {
            debug!("Batch abandoned before completion");
            if let Some(hook) = self.on_abandon.take() {
                hook();
            }
        }
    }
}

/// Creates the two ends of a batch and the stream the cursor reads from.
pub(crate) fn batch_channel<DB: Database>(
    on_abandon: Option<AbandonHook>,
) -> (BatchTask<DB>, RawStream<'static, DB>, BatchHandle) {
    let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
    let execution = Arc::new(Execution::default());

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed();

    let task = BatchTask {
        tx,
        execution: Arc::clone(&execution),
    };
    let handle = BatchHandle {
        execution,
        on_abandon,
    };

    (task, stream, handle)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Reading rows of the first statement.
    Scanning,
    /// Running the remaining statements of the batch.
    Draining,
    Done,
}

/// Cursor over the result set of the first statement in a batch.
///
/// Later statements still run to completion once the first result set is
/// exhausted; their rows are discarded.
pub(crate) struct SqlxCursor<DB: Database> {
    stream: RawStream<'static, DB>,
    columns: Vec<String>,
    pending: Option<DB::Row>,
    phase: Phase,
    decode: CellDecoder<DB>,
    map_err: ErrorMapper,
    _batch: BatchHandle,
}

impl<DB: Database> SqlxCursor<DB> {
    /// Starts reading the batch.
    ///
    /// If the first statement yields no rows the rest of the batch is run
    /// here, so an execution error in any statement is returned before a
    /// cursor exists.
    pub(crate) async fn open(
        mut stream: RawStream<'static, DB>,
        batch: BatchHandle,
        decode: CellDecoder<DB>,
        map_err: ErrorMapper,
    ) -> Result<Self> {
        let first = stream.next().await.transpose().map_err(map_err)?;

        let (pending, phase) = match first {
            Some(Either::Right(row)) => (Some(row), Phase::Scanning),
            Some(Either::Left(_)) => (None, Phase::Draining),
            None => (None, Phase::Done),
        };

        let mut cursor = Self {
            columns: pending.as_ref().map(column_names).unwrap_or_default(),
            stream,
            pending,
            phase,
            decode,
            map_err,
            _batch: batch,
        };

        if cursor.phase == Phase::Draining {
            cursor.drain().await?;
        }

        Ok(cursor)
    }

    /// Returns true when the first statement produced no rows.
    pub(crate) fn is_rowless(&self) -> bool {
        self.pending.is_none() && self.phase == Phase::Done
    }

    /// Sets the column names for a rowless result.
    pub(crate) fn set_columns(&mut self, columns: Vec<String>) {
        self.columns = columns;
    }

    fn decode_row(&self, row: &DB::Row) -> Result<Row> {
        (0..row.len()).map(|i| (self.decode)(row, i)).collect()
    }

    async fn drain(&mut self) -> Result<()> {
        self.phase = Phase::Draining;
        let mut discarded = 0usize;

        while let Some(item) = self.stream.next().await {
            if let Either::Right(_) = item.map_err(self.map_err)? {
                discarded += 1;
            }
        }

        if discarded > 0 {
            debug!("Discarded {} rows from later result sets", discarded);
        }
        self.phase = Phase::Done;
        Ok(())
    }
}

#[async_trait]
impl<DB: Database> Cursor for SqlxCursor<DB> {
    async fn columns(&mut self) -> Result<Vec<String>> {
        Ok(self.columns.clone())
    }

    async fn next_row(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.pending.take() {
            return self.decode_row(&row).map(Some);
        }

        if self.phase != Phase::Scanning {
            return Ok(None);
        }

        match self.stream.next().await {
            Some(Ok(Either::Right(row))) => self.decode_row(&row).map(Some),
            Some(Ok(Either::Left(_))) => {
                self.drain().await?;
                Ok(None)
            }
            Some(Err(e)) => {
                self.phase = Phase::Done;
                Err((self.map_err)(e))
            }
            None => {
                self.phase = Phase::Done;
                Ok(None)
            }
        }
    }
}

/// Extracts column names from a driver row in engine order.
pub(crate) fn column_names<R: SqlxRow>(row: &R) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}
