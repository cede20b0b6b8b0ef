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

//! Parsing and normalization helpers shared across the connector and engine.

use aws_lc_rs::digest;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::{
    common::enums::OrderLifecycleStatus,
    error::{ConnectorError, ConnectorErrorCode},
};

/// Epoch values above this threshold are interpreted as milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1_000_000_000_000.0;

/// Returns the current UTC wall clock as ISO-8601 with millisecond precision
/// and a trailing `Z`.
#[must_use]
pub fn utc_now_iso_millis() -> String {
    format_iso_millis(Utc::now())
}

/// Formats a timestamp as ISO-8601 with millisecond precision and a trailing `Z`.
#[must_use]
pub fn format_iso_millis(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Normalizes a wire timestamp to UTC ISO-8601 with a trailing `Z`.
///
/// Accepts ISO-8601 strings (`Z`, explicit offset, or naive assumed UTC) and
/// numeric epoch values (seconds, or milliseconds when above `1e12`).
/// Sub-millisecond precision is truncated; whole-second inputs render
/// without a fractional component. The normalization is idempotent.
///
/// # Errors
///
/// Returns a schema-validation [`ConnectorError`] when the value is missing,
/// non-temporal, or unparsable.
pub fn normalize_timestamp(value: Option<&Value>) -> Result<String, ConnectorError> {
    let value = value.ok_or_else(|| schema_error("timestamp is required"))?;

    let dt = match value {
        Value::String(raw) => parse_iso_datetime(raw)?,
        Value::Number(_) => {
            let epoch = value
                .as_f64()
                .ok_or_else(|| schema_error("timestamp is not a finite number"))?;
            datetime_from_epoch(epoch)?
        }
        _ => return Err(schema_error("timestamp must be a string or number")),
    };

    let millis = dt.timestamp_millis();
    let truncated = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| schema_error("timestamp out of range"))?;
    Ok(truncated.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn parse_iso_datetime(raw: &str) -> Result<DateTime<Utc>, ConnectorError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // Naive timestamps are assumed UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|err| schema_error(&format!("invalid timestamp '{raw}': {err}")))
}

fn datetime_from_epoch(epoch: f64) -> Result<DateTime<Utc>, ConnectorError> {
    if !epoch.is_finite() {
        return Err(schema_error("timestamp is not a finite number"));
    }
    let millis = if epoch > EPOCH_MILLIS_THRESHOLD {
        epoch
    } else {
        epoch * 1_000.0
    };
    DateTime::<Utc>::from_timestamp_millis(millis.round() as i64)
        .ok_or_else(|| schema_error("timestamp out of range"))
}

/// Extracts the source sequence from a payload, trying `sequence`, `seq`,
/// then `sid`; defaults to 0 when absent.
#[must_use]
pub fn extract_sequence(payload: &Value) -> i64 {
    for key in ["sequence", "seq", "sid"] {
        if let Some(sequence) = payload.get(key).and_then(value_as_i64) {
            return sequence;
        }
    }
    0
}

/// Lenient integer coercion: integral numbers, whole floats, and numeric strings.
#[must_use]
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(raw) => raw.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Returns a non-empty trimmed string for the first present key.
#[must_use]
pub fn first_string(payload: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(raw) = payload.get(*key) {
            let text = match raw {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Normalizes a raw exchange status string to the internal lifecycle enum.
///
/// Matching is case-insensitive over a fixed vocabulary; unknown strings map
/// to [`OrderLifecycleStatus::Unknown`]. The normalization is idempotent.
#[must_use]
pub fn normalize_exchange_status(raw: &str) -> OrderLifecycleStatus {
    match raw.trim().to_lowercase().as_str() {
        "pending" | "queued" => OrderLifecycleStatus::Pending,
        "resting" | "open" | "active" => OrderLifecycleStatus::Open,
        "partially_filled" | "partial_fill" => OrderLifecycleStatus::PartiallyFilled,
        "filled" | "executed" => OrderLifecycleStatus::Filled,
        "canceled" | "cancelled" | "void" => OrderLifecycleStatus::Canceled,
        "rejected" | "declined" => OrderLifecycleStatus::Rejected,
        "expired" => OrderLifecycleStatus::Expired,
        _ => OrderLifecycleStatus::Unknown,
    }
}

/// Serializes a JSON value canonically: sorted keys, compact separators.
///
/// `serde_json` maps are ordered, so serialization yields sorted keys at
/// every nesting level.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Hex-encoded SHA-256 digest of the given bytes.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = digest::digest(&digest::SHA256, data);
    hex::encode(digest.as_ref())
}

fn schema_error(message: &str) -> ConnectorError {
    ConnectorError::new(ConnectorErrorCode::SchemaValidation, message)
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
