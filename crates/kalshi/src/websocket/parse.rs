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

//! Channel-specific normalization of raw market-data frames.
//!
//! Raw frames become canonical per-schema payloads; the normalizer wraps
//! each payload in the standard event envelope and publishes it to the
//! internal bus. Parse failures raise schema-validation errors; unsupported
//! channels are skipped without raising.

use std::{str::FromStr, sync::Arc};

use serde_json::{Value, json};

use crate::{
    common::{
        consts::KALSHI_SOURCE,
        enums::{LiquiditySide, OrderSide, StreamChannel, TradeSide},
        parse::{extract_sequence, first_string, normalize_timestamp, utc_now_iso_millis, value_as_i64},
    },
    error::ConnectorError,
    interfaces::EventPublisher,
};

/// Normalizes one raw frame into its canonical payload.
///
/// Returns `Ok(None)` for unsupported or unidentifiable channels.
///
/// # Errors
///
/// Returns a schema-validation [`ConnectorError`] when a supported channel's
/// payload is malformed.
pub fn normalize_market_message(raw: &Value) -> Result<Option<Value>, ConnectorError> {
    let Some(channel) = channel_of(raw) else {
        tracing::debug!("skipping frame without channel discriminator");
        return Ok(None);
    };

    let payload = payload_of(raw);
    match StreamChannel::from_str(&channel) {
        Ok(StreamChannel::OrderbookDelta) => parse_orderbook_delta(payload).map(Some),
        Ok(StreamChannel::Trade) => parse_trade(payload).map(Some),
        Err(_) => {
            tracing::debug!(%channel, "skipping unsupported market-data channel");
            Ok(None)
        }
    }
}

/// Channel selection: `raw.channel`, else `raw.data.type`, else `raw.type`.
fn channel_of(raw: &Value) -> Option<String> {
    first_string(raw, &["channel"])
        .or_else(|| raw.get("data").and_then(|data| first_string(data, &["type"])))
        .or_else(|| first_string(raw, &["type"]))
}

/// Payload selection: `raw.data` when it is a mapping, else `raw` itself.
fn payload_of(raw: &Value) -> &Value {
    match raw.get("data") {
        Some(data) if data.is_object() => data,
        _ => raw,
    }
}

fn parse_orderbook_delta(payload: &Value) -> Result<Value, ConnectorError> {
    let market_id = required_string(payload, "market_id")?;
    let side = required_enum::<OrderSide>(payload, "side")?;
    let price = required_int(payload, &["price"])?;
    let size_delta = required_int(payload, &["size_delta", "delta", "size"])?;
    let timestamp = normalize_timestamp(payload.get("timestamp"))?;

    Ok(json!({
        "schema": "orderbook_delta",
        "market_id": market_id,
        "sequence": extract_sequence(payload),
        "timestamp": timestamp,
        "side": side,
        "price": price,
        "size_delta": size_delta,
    }))
}

fn parse_trade(payload: &Value) -> Result<Value, ConnectorError> {
    let market_id = required_string(payload, "market_id")?;
    let side = required_enum::<TradeSide>(payload, "side")?;
    let liquidity = required_enum::<LiquiditySide>(payload, "liquidity")?;
    let price = required_int(payload, &["price"])?;
    let size = required_int(payload, &["size"])?;
    let trade_id = first_string(payload, &["trade_id", "id"])
        .ok_or_else(|| ConnectorError::schema("trade missing trade_id"))?;
    let timestamp = normalize_timestamp(payload.get("timestamp"))?;

    Ok(json!({
        "schema": "trade",
        "trade_id": trade_id,
        "market_id": market_id,
        "timestamp": timestamp,
        "side": side,
        "price": price,
        "size": size,
        "liquidity": liquidity,
    }))
}

fn required_string(payload: &Value, key: &str) -> Result<String, ConnectorError> {
    first_string(payload, &[key])
        .ok_or_else(|| ConnectorError::schema(format!("{key} is required")))
}

fn required_enum<T: FromStr>(payload: &Value, key: &str) -> Result<T, ConnectorError> {
    let raw = required_string(payload, key)?;
    T::from_str(&raw).map_err(|_| ConnectorError::schema(format!("invalid {key}: '{raw}'")))
}

fn required_int(payload: &Value, keys: &[&str]) -> Result<i64, ConnectorError> {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(value_as_i64))
        .ok_or_else(|| ConnectorError::schema(format!("{} is required", keys[0])))
}

/// Normalizes frames and publishes canonical envelopes to the internal bus.
#[derive(Clone, Debug)]
pub struct MarketDataNormalizer {
    publisher: Arc<dyn EventPublisher>,
}

impl MarketDataNormalizer {
    /// Creates a new [`MarketDataNormalizer`] instance.
    #[must_use]
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    /// Normalizes one raw frame, publishes its envelope, and returns the
    /// canonical events produced.
    ///
    /// # Errors
    ///
    /// Returns a schema-validation [`ConnectorError`] for malformed payloads
    /// on supported channels, or a publication failure from the bus.
    pub async fn process(&self, raw: &Value) -> Result<Vec<Value>, ConnectorError> {
        let Some(canonical) = normalize_market_message(raw)? else {
            return Ok(Vec::new());
        };

        let envelope = json!({
            "source": KALSHI_SOURCE,
            "schema": canonical["schema"],
            "source_sequence": extract_sequence(payload_of(raw)),
            "source_timestamp": canonical["timestamp"],
            "ingest_timestamp": utc_now_iso_millis(),
            "payload": canonical,
        });
        self.publisher.publish(envelope).await?;

        Ok(vec![canonical])
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{bus::InMemoryEventBus, error::ConnectorErrorCode};

    #[tokio::test]
    async fn test_orderbook_delta_normalizes_and_publishes_envelope() {
        let (bus, mut events) = InMemoryEventBus::new(8);
        let normalizer = MarketDataNormalizer::new(Arc::new(bus));

        let raw = json!({
            "channel": "orderbook_delta",
            "data": {
                "market_id": "KXTEST",
                "sequence": 42,
                "timestamp": "2026-01-01T12:00:00Z",
                "side": "YES",
                "price": "44",
                "size_delta": "12",
            },
        });
        let produced = normalizer.process(&raw).await.unwrap();

        assert_eq!(
            produced,
            vec![json!({
                "schema": "orderbook_delta",
                "market_id": "KXTEST",
                "sequence": 42,
                "timestamp": "2026-01-01T12:00:00Z",
                "side": "yes",
                "price": 44,
                "size_delta": 12,
            })]
        );

        let envelope = events.recv().await.unwrap();
        assert_eq!(envelope["source"], "kalshi");
        assert_eq!(envelope["schema"], "orderbook_delta");
        assert_eq!(envelope["source_sequence"], 42);
        assert_eq!(envelope["source_timestamp"], "2026-01-01T12:00:00Z");
        assert_eq!(envelope["payload"]["schema"], "orderbook_delta");
        assert!(
            envelope["ingest_timestamp"]
                .as_str()
                .unwrap()
                .ends_with('Z')
        );
    }

    #[tokio::test]
    async fn test_trade_normalizes_epoch_seconds_and_seq_fallback() {
        let (bus, mut events) = InMemoryEventBus::new(8);
        let normalizer = MarketDataNormalizer::new(Arc::new(bus));

        let raw = json!({
            "type": "trade",
            "market_id": "KXTEST",
            "trade_id": "t-1",
            "seq": 99,
            "timestamp": 1_767_225_600,
            "side": "buy_yes",
            "price": 51,
            "size": 7,
            "liquidity": "maker",
        });
        let produced = normalizer.process(&raw).await.unwrap();

        assert_eq!(
            produced,
            vec![json!({
                "schema": "trade",
                "trade_id": "t-1",
                "market_id": "KXTEST",
                "timestamp": "2026-01-01T00:00:00Z",
                "side": "buy_yes",
                "price": 51,
                "size": 7,
                "liquidity": "maker",
            })]
        );

        let envelope = events.recv().await.unwrap();
        assert_eq!(envelope["schema"], "trade");
        assert_eq!(envelope["source_sequence"], 99);
        assert_eq!(envelope["payload"]["trade_id"], "t-1");
    }

    #[tokio::test]
    async fn test_unsupported_channel_is_skipped_without_publishing() {
        let (bus, mut events) = InMemoryEventBus::new(8);
        let normalizer = MarketDataNormalizer::new(Arc::new(bus));

        let produced = normalizer
            .process(&json!({"channel": "ticker", "data": {"market_id": "KXTEST"}}))
            .await
            .unwrap();

        assert!(produced.is_empty());
        assert!(events.try_recv().is_err());
    }

    #[rstest]
    fn test_trade_falls_back_to_id_for_trade_id() {
        let payload = json!({
            "type": "trade",
            "market_id": "KXTEST",
            "id": "t-9",
            "timestamp": "2026-01-01T00:00:00Z",
            "side": "sell_no",
            "price": 33,
            "size": 2,
            "liquidity": "taker",
        });
        let canonical = normalize_market_message(&payload).unwrap().unwrap();
        assert_eq!(canonical["trade_id"], "t-9");
    }

    #[rstest]
    #[case("size_delta")]
    #[case("delta")]
    #[case("size")]
    fn test_size_delta_fallbacks(#[case] key: &str) {
        let mut payload = json!({
            "channel": "orderbook_delta",
            "market_id": "KXTEST",
            "timestamp": "2026-01-01T00:00:00Z",
            "side": "no",
            "price": 10,
        });
        payload[key] = json!(-3);

        let canonical = normalize_market_message(&payload).unwrap().unwrap();
        assert_eq!(canonical["size_delta"], -3, "fallback key {key}");
    }

    #[rstest]
    #[case(json!({"channel": "orderbook_delta", "side": "yes", "price": 1, "size_delta": 1, "timestamp": "2026-01-01T00:00:00Z"}))]
    #[case(json!({"channel": "orderbook_delta", "market_id": "KXTEST", "side": "maybe", "price": 1, "size_delta": 1, "timestamp": "2026-01-01T00:00:00Z"}))]
    #[case(json!({"channel": "orderbook_delta", "market_id": "KXTEST", "side": "yes", "price": 1, "size_delta": 1}))]
    #[case(json!({"channel": "trade", "market_id": "KXTEST", "trade_id": "t", "side": "buy_yes", "price": 1, "size": 1, "liquidity": "blended", "timestamp": 1}))]
    fn test_malformed_payloads_are_schema_errors(#[case] raw: Value) {
        let error = normalize_market_message(&raw).unwrap_err();
        assert_eq!(error.code, ConnectorErrorCode::SchemaValidation);
    }

    #[rstest]
    fn test_missing_channel_is_skipped() {
        assert_eq!(normalize_market_message(&json!({"x": 1})).unwrap(), None);
    }
}
