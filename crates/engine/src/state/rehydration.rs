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

//! Boot-time state rehydration and reconciliation against exchange snapshots.
//!
//! The rehydrator is all-or-nothing: it fetches open orders and positions,
//! diffs them against the local state tables, persists every drift record to
//! the reconciliation ledger, records a run row, and only then opens the
//! readiness gate. Any failure records a failed run and keeps the gate shut.
//!
//! The rehydrator uses its own short-lived connection and touches only its
//! own tables; the event ledger remains exclusively owned by the writer.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use serde_json::{Value, json};
use sqlx::{
    Connection, Row, SqliteConnection,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};
use strum::{AsRefStr, Display};
use thiserror::Error;

use sidecar_kalshi::{
    common::parse::{canonical_json, sha256_hex, utc_now_iso_millis},
    interfaces::AccountReadClient,
};

use super::gate::StateReadinessGate;

/// Source system stamped on reconciliation ledger rows.
const REHYDRATION_SOURCE: &str = "kalshi_rehydration";

/// Raised when boot-time state reconciliation fails.
#[derive(Debug, Error)]
pub enum RehydrationError {
    /// The reconciliation run itself failed.
    #[error("rehydration failed: {0}")]
    Failed(String),
    /// Strategy execution was attempted against a closed gate.
    #[error("strategy execution blocked: {0}")]
    Blocked(String),
}

/// Reconciliation category of a drift record.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DriftCategory {
    Orders,
    Positions,
}

/// Repair applied for a drift record.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DriftAction {
    InsertFromExchange,
    MarkClosedMissingExchange,
    UpdateFromExchange,
    UpsertFromExchange,
    DeleteMissingExchange,
}

/// One discrepancy between local state and the exchange snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct DriftRecord {
    pub category: DriftCategory,
    pub entity_key: String,
    pub action: DriftAction,
    pub source_event_id: String,
    pub payload: Value,
}

/// Rehydrates order/position state from the exchange before strategy execution.
#[derive(Debug)]
pub struct StateRehydrator {
    db_path: PathBuf,
    client: Arc<dyn AccountReadClient>,
    gate: Arc<StateReadinessGate>,
}

impl StateRehydrator {
    /// Creates a new [`StateRehydrator`] instance.
    #[must_use]
    pub fn new(
        db_path: impl Into<PathBuf>,
        client: Arc<dyn AccountReadClient>,
        gate: Arc<StateReadinessGate>,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            client,
            gate,
        }
    }

    /// Runs the boot reconciliation and opens the readiness gate on success.
    ///
    /// # Errors
    ///
    /// Returns [`RehydrationError::Failed`] on any failure; the failure is
    /// also recorded in `rehydration_runs` and the gate stays closed.
    pub async fn boot_rehydrate(&self) -> Result<(), RehydrationError> {
        let started_at = utc_now_iso_millis();
        let boot_id = started_at.clone();
        self.gate.mark_not_ready("rehydration in progress");

        match self.reconcile(&boot_id, &started_at).await {
            Ok(drift_count) => {
                tracing::info!(%boot_id, drift_count, "boot rehydration completed");
                self.gate.mark_ready(&utc_now_iso_millis());
                Ok(())
            }
            Err(error) => {
                let message = error.to_string();
                tracing::error!(%boot_id, error = %message, "boot rehydration failed");
                if let Err(record_error) = self
                    .record_failed_run(&boot_id, &started_at, &message)
                    .await
                {
                    tracing::error!(error = %record_error, "failed to record failed run");
                }
                self.gate.mark_not_ready(&message);
                Err(RehydrationError::Failed(message))
            }
        }
    }

    async fn reconcile(&self, boot_id: &str, started_at: &str) -> anyhow::Result<usize> {
        let mut conn = self.open_connection().await?;
        ensure_schema(&mut conn).await?;

        let open_orders = normalize_orders(&self.client.get_open_orders().await?);
        let positions = normalize_positions(&self.client.get_positions().await?);

        let mut drift = reconcile_orders(&mut conn, &open_orders, boot_id).await?;
        drift.extend(reconcile_positions(&mut conn, &positions, boot_id).await?);

        persist_drift_events(&mut conn, &drift).await?;
        record_run(
            &mut conn,
            boot_id,
            started_at,
            "completed",
            drift.len() as i64,
            None,
        )
        .await?;

        conn.close().await?;
        Ok(drift.len())
    }

    async fn record_failed_run(
        &self,
        boot_id: &str,
        started_at: &str,
        error: &str,
    ) -> anyhow::Result<()> {
        let mut conn = self.open_connection().await?;
        ensure_schema(&mut conn).await?;
        record_run(&mut conn, boot_id, started_at, "failed", 0, Some(error)).await?;
        conn.close().await?;
        Ok(())
    }

    async fn open_connection(&self) -> Result<SqliteConnection, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(&self.db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        SqliteConnection::connect_with(&options).await
    }
}

/// Idempotent creation of the rehydrator-owned tables.
async fn ensure_schema(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS state_orders (
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

        CREATE TABLE IF NOT EXISTS reconciliation_event_ledger (
            ledger_id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_system TEXT NOT NULL,
            source_event_id TEXT NOT NULL,
            category TEXT NOT NULL,
            entity_key TEXT NOT NULL,
            action TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            payload_sha256 TEXT NOT NULL,
            ingest_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(source_system, source_event_id)
        );

        CREATE TABLE IF NOT EXISTS rehydration_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            boot_id TEXT NOT NULL UNIQUE,
            started_at TEXT NOT NULL,
            completed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            status TEXT NOT NULL,
            drift_count INTEGER NOT NULL,
            error TEXT
        );",
    )
    .execute(conn)
    .await?;
    Ok(())
}

/// Extracts `orders` keyed by `order_id` (falling back to `id`).
fn normalize_orders(response: &Value) -> BTreeMap<String, Value> {
    let mut normalized = BTreeMap::new();
    let Some(raw_orders) = response.get("orders").and_then(Value::as_array) else {
        return normalized;
    };
    for item in raw_orders {
        if !item.is_object() {
            continue;
        }
        let order_id = string_of(item, "order_id").or_else(|| string_of(item, "id"));
        if let Some(order_id) = order_id {
            normalized.insert(order_id, item.clone());
        }
    }
    normalized
}

/// Extracts `positions` keyed by `market_id[:side]`.
fn normalize_positions(response: &Value) -> BTreeMap<String, Value> {
    let mut normalized = BTreeMap::new();
    let Some(raw_positions) = response.get("positions").and_then(Value::as_array) else {
        return normalized;
    };
    for item in raw_positions {
        if !item.is_object() {
            continue;
        }
        let market_id = string_of(item, "market_id").or_else(|| string_of(item, "ticker"));
        let Some(market_id) = market_id else {
            continue;
        };
        let side = string_of(item, "side")
            .map(|side| side.to_lowercase())
            .unwrap_or_default();
        let key = if side.is_empty() {
            market_id
        } else {
            format!("{market_id}:{side}")
        };
        normalized.insert(key, item.clone());
    }
    normalized
}

fn string_of(item: &Value, key: &str) -> Option<String> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(ToString::to_string)
}

async fn reconcile_orders(
    conn: &mut SqliteConnection,
    remote_orders: &BTreeMap<String, Value>,
    boot_id: &str,
) -> anyhow::Result<Vec<DriftRecord>> {
    let mut existing: BTreeMap<String, (String, String)> = BTreeMap::new();
    for row in sqlx::query("SELECT order_id, state, payload_sha256 FROM state_orders")
        .fetch_all(&mut *conn)
        .await?
    {
        existing.insert(
            row.get::<String, _>(0),
            (row.get::<String, _>(1), row.get::<String, _>(2)),
        );
    }

    let mut all_ids: Vec<String> = existing.keys().cloned().collect();
    for order_id in remote_orders.keys() {
        if !existing.contains_key(order_id) {
            all_ids.push(order_id.clone());
        }
    }
    all_ids.sort();

    let mut drift = Vec::new();
    for order_id in all_ids {
        let remote_payload = remote_orders.get(&order_id);
        let existing_row = existing.get(&order_id);
        let event_base = format!("boot:{boot_id}:orders:{order_id}");

        match (remote_payload, existing_row) {
            (Some(remote), None) => {
                let payload_json = canonical_json(remote);
                let payload_hash = sha256_hex(payload_json.as_bytes());
                sqlx::query(
                    "INSERT INTO state_orders(order_id, payload_json, payload_sha256, state, updated_at)
                     VALUES (?, ?, ?, 'open', ?)
                     ON CONFLICT(order_id) DO UPDATE SET
                         payload_json = excluded.payload_json,
                         payload_sha256 = excluded.payload_sha256,
                         state = 'open',
                         updated_at = excluded.updated_at",
                )
                .bind(&order_id)
                .bind(&payload_json)
                .bind(&payload_hash)
                .bind(utc_now_iso_millis())
                .execute(&mut *conn)
                .await?;
                drift.push(DriftRecord {
                    category: DriftCategory::Orders,
                    entity_key: order_id.clone(),
                    action: DriftAction::InsertFromExchange,
                    source_event_id: format!("{event_base}:insert"),
                    payload: remote.clone(),
                });
            }
            (None, Some((state, _))) if state != "closed" => {
                sqlx::query("UPDATE state_orders SET state = 'closed', updated_at = ? WHERE order_id = ?")
                    .bind(utc_now_iso_millis())
                    .bind(&order_id)
                    .execute(&mut *conn)
                    .await?;
                drift.push(DriftRecord {
                    category: DriftCategory::Orders,
                    entity_key: order_id.clone(),
                    action: DriftAction::MarkClosedMissingExchange,
                    source_event_id: format!("{event_base}:close"),
                    payload: json!({"order_id": order_id, "state": "closed"}),
                });
            }
            (Some(remote), Some((state, stored_hash))) => {
                let payload_json = canonical_json(remote);
                let payload_hash = sha256_hex(payload_json.as_bytes());
                if payload_hash != *stored_hash || state != "open" {
                    sqlx::query(
                        "UPDATE state_orders
                         SET payload_json = ?, payload_sha256 = ?, state = 'open', updated_at = ?
                         WHERE order_id = ?",
                    )
                    .bind(&payload_json)
                    .bind(&payload_hash)
                    .bind(utc_now_iso_millis())
                    .bind(&order_id)
                    .execute(&mut *conn)
                    .await?;
                    drift.push(DriftRecord {
                        category: DriftCategory::Orders,
                        entity_key: order_id.clone(),
                        action: DriftAction::UpdateFromExchange,
                        source_event_id: format!("{event_base}:update"),
                        payload: remote.clone(),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(drift)
}

async fn reconcile_positions(
    conn: &mut SqliteConnection,
    remote_positions: &BTreeMap<String, Value>,
    boot_id: &str,
) -> anyhow::Result<Vec<DriftRecord>> {
    let mut existing: BTreeMap<String, String> = BTreeMap::new();
    for row in sqlx::query("SELECT position_key, payload_sha256 FROM state_positions")
        .fetch_all(&mut *conn)
        .await?
    {
        existing.insert(row.get::<String, _>(0), row.get::<String, _>(1));
    }

    let mut all_keys: Vec<String> = existing.keys().cloned().collect();
    for key in remote_positions.keys() {
        if !existing.contains_key(key) {
            all_keys.push(key.clone());
        }
    }
    all_keys.sort();

    let mut drift = Vec::new();
    for key in all_keys {
        let event_base = format!("boot:{boot_id}:positions:{key}");

        let Some(remote) = remote_positions.get(&key) else {
            sqlx::query("DELETE FROM state_positions WHERE position_key = ?")
                .bind(&key)
                .execute(&mut *conn)
                .await?;
            drift.push(DriftRecord {
                category: DriftCategory::Positions,
                entity_key: key.clone(),
                action: DriftAction::DeleteMissingExchange,
                source_event_id: format!("{event_base}:delete"),
                payload: json!({"position_key": key, "deleted": true}),
            });
            continue;
        };

        let payload_json = canonical_json(remote);
        let payload_hash = sha256_hex(payload_json.as_bytes());
        sqlx::query(
            "INSERT INTO state_positions(position_key, payload_json, payload_sha256, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(position_key) DO UPDATE SET
                 payload_json = excluded.payload_json,
                 payload_sha256 = excluded.payload_sha256,
                 updated_at = excluded.updated_at",
        )
        .bind(&key)
        .bind(&payload_json)
        .bind(&payload_hash)
        .bind(utc_now_iso_millis())
        .execute(&mut *conn)
        .await?;

        if existing.get(&key) != Some(&payload_hash) {
            drift.push(DriftRecord {
                category: DriftCategory::Positions,
                entity_key: key.clone(),
                action: DriftAction::UpsertFromExchange,
                source_event_id: format!("{event_base}:upsert"),
                payload: remote.clone(),
            });
        }
    }
    Ok(drift)
}

async fn persist_drift_events(
    conn: &mut SqliteConnection,
    drift: &[DriftRecord],
) -> anyhow::Result<()> {
    for item in drift {
        let payload_json = canonical_json(&item.payload);
        let payload_hash = sha256_hex(payload_json.as_bytes());
        sqlx::query(
            "INSERT INTO reconciliation_event_ledger(
                source_system, source_event_id, category, entity_key, action,
                payload_json, payload_sha256, ingest_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(source_system, source_event_id) DO UPDATE SET
                 payload_json = excluded.payload_json,
                 payload_sha256 = excluded.payload_sha256,
                 ingest_at = excluded.ingest_at",
        )
        .bind(REHYDRATION_SOURCE)
        .bind(&item.source_event_id)
        .bind(item.category.as_ref())
        .bind(&item.entity_key)
        .bind(item.action.as_ref())
        .bind(&payload_json)
        .bind(&payload_hash)
        .bind(utc_now_iso_millis())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn record_run(
    conn: &mut SqliteConnection,
    boot_id: &str,
    started_at: &str,
    status: &str,
    drift_count: i64,
    error: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO rehydration_runs(boot_id, started_at, completed_at, status, drift_count, error)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(boot_id) DO UPDATE SET
             completed_at = excluded.completed_at,
             status = excluded.status,
             drift_count = excluded.drift_count,
             error = excluded.error",
    )
    .bind(boot_id)
    .bind(started_at)
    .bind(utc_now_iso_millis())
    .bind(status)
    .bind(drift_count)
    .bind(error)
    .execute(conn)
    .await?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
