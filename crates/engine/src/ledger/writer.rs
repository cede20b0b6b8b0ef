// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Prediction Trader. All rights reserved.
//
//  Licensed under the MIT License; you may not use this file except in
//  compliance with the License. You may obtain a copy of the License at
//  https://opensource.org/licenses/MIT
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Single-writer persistence worker for the inbound event ledger.
//!
//! One serialized task drains a bounded multi-producer queue and executes
//! every transaction against an exclusively owned connection. Upserts are
//! idempotent with a sticky `dead_letter` rule; semantically invalid
//! submissions and exhausted lock retries are routed to the poison table;
//! any other storage error is fatal to the worker.

use std::path::{Path, PathBuf};

use rand::RngExt;
use serde_json::Value;
use sqlx::{
    Connection, SqliteConnection,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use sidecar_kalshi::common::parse::{canonical_json, sha256_hex, utc_now_iso_millis};

use super::{
    LedgerError,
    migrations::{apply_migrations, verify_runtime_pragmas, verify_schema},
};
use crate::config::LedgerWriterConfig;

/// One inbound submission for the event ledger.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundEvent {
    pub source_system: String,
    pub source_event_id: String,
    pub payload: Value,
    pub source_sequence: Option<i64>,
    pub source_emitted_at: Option<String>,
}

impl InboundEvent {
    /// Creates an event with only the natural key and payload populated.
    #[must_use]
    pub fn new(source_system: &str, source_event_id: &str, payload: Value) -> Self {
        Self {
            source_system: source_system.to_string(),
            source_event_id: source_event_id.to_string(),
            payload,
            source_sequence: None,
            source_emitted_at: None,
        }
    }
}

enum WriterCommand {
    Write(InboundEvent),
    Flush(oneshot::Sender<()>),
    Stop,
}

/// Single queue writer that serializes all SQLite transactions.
#[derive(Debug)]
pub struct SqliteWriteWorker {
    db_path: PathBuf,
    config: LedgerWriterConfig,
    tx: Option<mpsc::Sender<WriterCommand>>,
    task: Option<JoinHandle<Result<(), LedgerError>>>,
}

impl SqliteWriteWorker {
    /// Creates a new [`SqliteWriteWorker`] instance.
    #[must_use]
    pub fn new(db_path: impl Into<PathBuf>, config: LedgerWriterConfig) -> Self {
        Self {
            db_path: db_path.into(),
            config,
            tx: None,
            task: None,
        }
    }

    /// Opens the database, applies migrations, verifies runtime pragmas and
    /// schema, and spawns the writer task. Idempotent when already started.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::SchemaMismatch`] when startup checks fail, or
    /// [`LedgerError::Database`] on connection/migration failure.
    pub async fn start(&mut self) -> Result<(), LedgerError> {
        if self.task.is_some() {
            return Ok(());
        }

        let mut conn = open_writer_connection(&self.db_path).await?;
        apply_migrations(&mut conn).await?;
        verify_runtime_pragmas(&mut conn).await?;
        verify_schema(&mut conn).await?;

        let (tx, rx) = mpsc::channel(self.config.queue_maxsize);
        let config = self.config;
        self.tx = Some(tx);
        self.task = Some(tokio::spawn(run_worker(conn, rx, config)));
        Ok(())
    }

    /// Enqueues one event; suspends when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotStarted`] before `start`, or
    /// [`LedgerError::WorkerFailed`] when the worker has died.
    pub async fn submit(&self, event: InboundEvent) -> Result<(), LedgerError> {
        let tx = self.tx.as_ref().ok_or(LedgerError::NotStarted)?;
        tx.send(WriterCommand::Write(event))
            .await
            .map_err(|_| LedgerError::WorkerFailed("queue closed".to_string()))
    }

    /// Drains the queue to a barrier: resolves once every event enqueued
    /// before the call has been written.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotStarted`] before `start`, or
    /// [`LedgerError::WorkerFailed`] when the worker has died.
    pub async fn flush_queue(&self) -> Result<(), LedgerError> {
        let tx = self.tx.as_ref().ok_or(LedgerError::NotStarted)?;
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(WriterCommand::Flush(done_tx))
            .await
            .map_err(|_| LedgerError::WorkerFailed("queue closed".to_string()))?;
        done_rx
            .await
            .map_err(|_| LedgerError::WorkerFailed("worker exited during flush".to_string()))
    }

    /// Stops the worker: a sentinel is enqueued, the worker drains up to it
    /// and exits, and the connection is closed.
    ///
    /// # Errors
    ///
    /// Propagates the worker's fatal error when it died before the stop.
    pub async fn stop(&mut self) -> Result<(), LedgerError> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        // Ignore send failure: the worker may have already exited fatally.
        let _ = tx.send(WriterCommand::Stop).await;
        if let Some(task) = self.task.take() {
            return match task.await {
                Ok(result) => result,
                Err(join_error) => Err(LedgerError::WorkerFailed(join_error.to_string())),
            };
        }
        Ok(())
    }
}

async fn open_writer_connection(db_path: &Path) -> Result<SqliteConnection, LedgerError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);
    Ok(SqliteConnection::connect_with(&options).await?)
}

async fn run_worker(
    mut conn: SqliteConnection,
    mut rx: mpsc::Receiver<WriterCommand>,
    config: LedgerWriterConfig,
) -> Result<(), LedgerError> {
    let result = drain_queue(&mut conn, &mut rx, &config).await;
    if let Err(error) = &result {
        tracing::error!(error = %error, "ledger writer terminating on fatal error");
    }
    let _ = conn.close().await;
    result
}

async fn drain_queue(
    conn: &mut SqliteConnection,
    rx: &mut mpsc::Receiver<WriterCommand>,
    config: &LedgerWriterConfig,
) -> Result<(), LedgerError> {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Write(event) => {
                write_with_retries(conn, &event, config).await?;
            }
            WriterCommand::Flush(done) => {
                let _ = done.send(());
            }
            WriterCommand::Stop => return Ok(()),
        }
    }
    Ok(())
}

async fn write_with_retries(
    conn: &mut SqliteConnection,
    event: &InboundEvent,
    config: &LedgerWriterConfig,
) -> Result<(), LedgerError> {
    if event.source_system.is_empty() || event.source_event_id.is_empty() {
        record_poison(conn, event, "missing source_system/source_event_id").await?;
        return Ok(());
    }

    for attempt in 1..=config.lock_retry_limit + 1 {
        match upsert_event(conn, event).await {
            Ok(()) => return Ok(()),
            Err(error) if is_transient_lock(&error) => {
                if attempt > config.lock_retry_limit {
                    let reason = format!("db lock retries exhausted: {error}");
                    tracing::warn!(
                        source_system = %event.source_system,
                        source_event_id = %event.source_event_id,
                        attempts = attempt,
                        "routing submission to poison",
                    );
                    record_poison(conn, event, &reason).await?;
                    return Ok(());
                }
                tokio::time::sleep(backoff_delay(config, attempt)).await;
            }
            Err(error) => return Err(error),
        }
    }
    unreachable!("retry loop always returns")
}

/// Randomized exponential backoff: `U(0, min(cap, base * 2^(attempt-1)))`.
fn backoff_delay(config: &LedgerWriterConfig, attempt: u32) -> std::time::Duration {
    let exponent = attempt.saturating_sub(1).min(32);
    let cap = config
        .backoff_cap_seconds
        .min(config.backoff_base_seconds * 2f64.powi(exponent as i32));
    if cap <= 0.0 {
        return std::time::Duration::ZERO;
    }
    std::time::Duration::from_secs_f64(rand::rng().random_range(0.0..=cap))
}

/// Transient lock classification, isolated in one place.
fn is_transient_lock(error: &LedgerError) -> bool {
    let LedgerError::Database(sqlx::Error::Database(db_error)) = error else {
        return false;
    };
    let message = db_error.message().to_lowercase();
    message.contains("database is locked") || message.contains("database table is locked")
}

async fn upsert_event(conn: &mut SqliteConnection, event: &InboundEvent) -> Result<(), LedgerError> {
    let payload_json = canonical_json(&event.payload);
    let payload_sha = sha256_hex(payload_json.as_bytes());
    let now = utc_now_iso_millis();

    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    let insert = sqlx::query(
        "INSERT INTO event_ledger(
            source_system,
            source_event_id,
            source_sequence,
            source_emitted_at,
            payload_json,
            payload_sha256,
            ingest_first_seen_at,
            ingest_last_seen_at,
            ingest_attempt_count,
            process_state,
            process_error,
            processed_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, 'pending', NULL, NULL)
        ON CONFLICT(source_system, source_event_id) DO UPDATE SET
            source_sequence = COALESCE(excluded.source_sequence, event_ledger.source_sequence),
            source_emitted_at = COALESCE(excluded.source_emitted_at, event_ledger.source_emitted_at),
            payload_json = excluded.payload_json,
            payload_sha256 = excluded.payload_sha256,
            ingest_last_seen_at = excluded.ingest_last_seen_at,
            ingest_attempt_count = event_ledger.ingest_attempt_count + 1,
            process_state = CASE
                WHEN event_ledger.process_state = 'dead_letter' THEN event_ledger.process_state
                ELSE 'pending'
            END,
            process_error = CASE
                WHEN event_ledger.process_state = 'dead_letter' THEN event_ledger.process_error
                ELSE NULL
            END,
            processed_at = CASE
                WHEN event_ledger.process_state = 'dead_letter' THEN event_ledger.processed_at
                ELSE NULL
            END",
    )
    .bind(&event.source_system)
    .bind(&event.source_event_id)
    .bind(event.source_sequence)
    .bind(&event.source_emitted_at)
    .bind(&payload_json)
    .bind(&payload_sha)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await;

    match insert {
        Ok(_) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(())
        }
        Err(error) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(error.into())
        }
    }
}

async fn record_poison(
    conn: &mut SqliteConnection,
    event: &InboundEvent,
    reason: &str,
) -> Result<(), LedgerError> {
    let payload_json = canonical_json(&event.payload);
    sqlx::query(
        "INSERT INTO ingest_poison_messages(source_system, source_event_id, reason, payload_json)
         VALUES (?, ?, ?, ?)",
    )
    .bind(non_empty(&event.source_system))
    .bind(non_empty(&event.source_event_id))
    .bind(reason)
    .bind(&payload_json)
    .execute(conn)
    .await?;
    Ok(())
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
