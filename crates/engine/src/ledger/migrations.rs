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

//! Embedded schema migrations and fail-fast startup verification.
//!
//! Migrations apply in lexical order and stamp `schema_migrations`
//! idempotently. WAL journal mode and foreign keys are hard runtime
//! requirements; startup fails fast when either is off or when a required
//! table or column is missing.

use std::collections::BTreeSet;

use sqlx::{Row, SqliteConnection};

use super::LedgerError;

/// Ordered embedded migrations: `(version, sql)`.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_event_ledger.sql",
        r"
        CREATE TABLE IF NOT EXISTS event_ledger (
            ledger_id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_system TEXT NOT NULL,
            source_event_id TEXT NOT NULL,
            source_sequence INTEGER,
            source_emitted_at TEXT,
            payload_json TEXT NOT NULL,
            payload_sha256 TEXT NOT NULL,
            ingest_first_seen_at TEXT NOT NULL,
            ingest_last_seen_at TEXT NOT NULL,
            ingest_attempt_count INTEGER NOT NULL DEFAULT 1,
            process_state TEXT NOT NULL DEFAULT 'pending',
            process_error TEXT,
            processed_at TEXT,
            UNIQUE(source_system, source_event_id)
        );

        CREATE TABLE IF NOT EXISTS ingest_poison_messages (
            poison_id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_system TEXT,
            source_event_id TEXT,
            reason TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        ",
    ),
    (
        "0002_state_tables.sql",
        r"
        CREATE TABLE IF NOT EXISTS state_orders (
            order_id TEXT PRIMARY KEY,
            payload_json TEXT NOT NULL,
            payload_sha256 TEXT NOT NULL,
            state TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS state_positions (
            position_key TEXT PRIMARY KEY,
            payload_json TEXT NOT NULL,
            payload_sha256 TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );
        ",
    ),
];

/// Required tables and their exact required column sets.
const REQUIRED_TABLE_COLUMNS: &[(&str, &[&str])] = &[
    (
        "event_ledger",
        &[
            "ledger_id",
            "source_system",
            "source_event_id",
            "source_sequence",
            "source_emitted_at",
            "payload_json",
            "payload_sha256",
            "ingest_first_seen_at",
            "ingest_last_seen_at",
            "ingest_attempt_count",
            "process_state",
            "process_error",
            "processed_at",
        ],
    ),
    (
        "state_orders",
        &["order_id", "payload_json", "payload_sha256", "state", "updated_at"],
    ),
    (
        "state_positions",
        &["position_key", "payload_json", "payload_sha256", "updated_at"],
    ),
    (
        "ingest_poison_messages",
        &[
            "poison_id",
            "source_system",
            "source_event_id",
            "reason",
            "payload_json",
            "created_at",
        ],
    ),
];

/// Applies migrations in lexical order, stamping `schema_migrations`.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] when a migration statement fails.
pub async fn apply_migrations(conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        )",
    )
    .execute(&mut *conn)
    .await?;

    let applied: BTreeSet<String> = sqlx::query("SELECT version FROM schema_migrations")
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(|row| row.get::<String, _>(0))
        .collect();

    for (version, sql) in MIGRATIONS {
        if applied.contains(*version) {
            continue;
        }
        sqlx::raw_sql(sql).execute(&mut *conn).await?;
        sqlx::query("INSERT INTO schema_migrations(version) VALUES (?)")
            .bind(version)
            .execute(&mut *conn)
            .await?;
        tracing::info!(version, "applied ledger migration");
    }
    Ok(())
}

/// Verifies WAL journal mode and foreign keys are active.
///
/// # Errors
///
/// Returns [`LedgerError::SchemaMismatch`] when either pragma is off.
pub async fn verify_runtime_pragmas(conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    let journal_mode: String = sqlx::query("PRAGMA journal_mode")
        .fetch_one(&mut *conn)
        .await?
        .get(0);
    if !journal_mode.eq_ignore_ascii_case("wal") {
        return Err(LedgerError::SchemaMismatch(format!(
            "journal_mode mismatch: expected wal, got {journal_mode}"
        )));
    }

    let foreign_keys: i64 = sqlx::query("PRAGMA foreign_keys")
        .fetch_one(&mut *conn)
        .await?
        .get(0);
    if foreign_keys != 1 {
        return Err(LedgerError::SchemaMismatch(
            "foreign_keys must be ON".to_string(),
        ));
    }
    Ok(())
}

/// Lists the column names of one table.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] when the pragma query fails.
pub async fn list_table_columns(
    conn: &mut SqliteConnection,
    table_name: &str,
) -> Result<BTreeSet<String>, LedgerError> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table_name})"))
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| row.get::<String, _>("name"))
        .collect())
}

/// Fails fast when required tables or columns are missing.
///
/// # Errors
///
/// Returns [`LedgerError::SchemaMismatch`] naming the first missing table or
/// column set.
pub async fn verify_schema(conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    for (table_name, expected_columns) in REQUIRED_TABLE_COLUMNS {
        let columns = list_table_columns(conn, table_name).await?;
        if columns.is_empty() {
            return Err(LedgerError::SchemaMismatch(format!(
                "missing required table: {table_name}"
            )));
        }
        let missing: Vec<&str> = expected_columns
            .iter()
            .filter(|column| !columns.contains(**column))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(LedgerError::SchemaMismatch(format!(
                "schema mismatch for {table_name}; missing columns: {}",
                missing.join(", ")
            )));
        }
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
