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

//! Typed request/response models and schema validation for trading endpoints.
//!
//! Exchange responses are parsed leniently: alternative key spellings are
//! accepted (`order_id|id`, `ticker|market_id`, `count|quantity`, flat or
//! nested `balance`) and integer fields tolerate numeric strings.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    common::{
        enums::{OrderAction, OrderLifecycleStatus, OrderSide, OrderType},
        parse::{first_string, normalize_exchange_status, value_as_i64},
    },
    error::ConnectorError,
};

/// Request to place a new order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub market_id: String,
    pub side: OrderSide,
    pub action: OrderAction,
    pub count: i64,
    pub order_type: OrderType,
    pub yes_price: Option<i64>,
    pub no_price: Option<i64>,
    pub client_order_id: Option<String>,
    /// Inserted as the `Idempotency-Key` header when supplied.
    pub idempotency_key: Option<String>,
}

impl PlaceOrderRequest {
    /// Validates the request against the exchange contract.
    ///
    /// # Errors
    ///
    /// Returns a schema-validation [`ConnectorError`] describing the first
    /// violated constraint.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        if self.market_id.is_empty() {
            return Err(ConnectorError::schema("market_id is required"));
        }
        if self.count <= 0 {
            return Err(ConnectorError::schema("count must be positive"));
        }
        if self.order_type == OrderType::Limit
            && self.yes_price.is_none()
            && self.no_price.is_none()
        {
            return Err(ConnectorError::schema(
                "limit orders require yes_price or no_price",
            ));
        }
        for (name, price) in [("yes_price", self.yes_price), ("no_price", self.no_price)] {
            if let Some(price) = price {
                if !(1..=99).contains(&price) {
                    return Err(ConnectorError::schema(format!(
                        "{name} must be in [1, 99]"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Serializes the canonical exchange payload for `POST /portfolio/orders`.
    #[must_use]
    pub fn to_exchange_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("ticker".to_string(), json!(self.market_id));
        payload.insert("side".to_string(), json!(self.side));
        payload.insert("action".to_string(), json!(self.action));
        payload.insert("count".to_string(), json!(self.count));
        payload.insert("type".to_string(), json!(self.order_type));
        if let Some(yes_price) = self.yes_price {
            payload.insert("yes_price".to_string(), json!(yes_price));
        }
        if let Some(no_price) = self.no_price {
            payload.insert("no_price".to_string(), json!(no_price));
        }
        if let Some(client_order_id) = &self.client_order_id {
            payload.insert("client_order_id".to_string(), json!(client_order_id));
        }
        Value::Object(payload)
    }
}

/// Normalized order details returned by placement and query endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order_id: String,
    pub market_id: String,
    pub side: OrderSide,
    pub action: OrderAction,
    pub quantity: i64,
    pub filled_quantity: i64,
    pub lifecycle_status: OrderLifecycleStatus,
    pub raw_status: String,
}

impl OrderDetails {
    /// Parses an exchange order payload.
    ///
    /// # Errors
    ///
    /// Returns a schema-validation [`ConnectorError`] when the order id is
    /// missing or the side/action values are unrecognized.
    pub fn from_exchange(payload: &Value) -> Result<Self, ConnectorError> {
        let order_id = first_string(payload, &["order_id", "id"])
            .ok_or_else(|| ConnectorError::schema("order response missing order_id"))?;

        let raw_status = first_string(payload, &["status", "order_status"]).unwrap_or_default();

        Ok(Self {
            order_id,
            market_id: first_string(payload, &["ticker", "market_id"]).unwrap_or_default(),
            side: parse_enum::<OrderSide>(payload, "side", None)?,
            action: parse_enum::<OrderAction>(payload, "action", Some(OrderAction::Buy))?,
            quantity: int_field(payload, &["count", "quantity"]),
            filled_quantity: int_field(payload, &["filled_count", "filled_quantity"]),
            lifecycle_status: normalize_exchange_status(&raw_status),
            raw_status,
        })
    }
}

/// Response from `POST /portfolio/orders`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderResponse {
    pub order: OrderDetails,
}

impl PlaceOrderResponse {
    /// Parses an order-placement response, accepting the order either nested
    /// under `order` or at the top level.
    ///
    /// # Errors
    ///
    /// Returns a schema-validation [`ConnectorError`] when the order payload
    /// is malformed.
    pub fn from_exchange(payload: &Value) -> Result<Self, ConnectorError> {
        let order_payload = match payload.get("order") {
            Some(nested) if nested.is_object() => nested,
            _ => payload,
        };
        Ok(Self {
            order: OrderDetails::from_exchange(order_payload)?,
        })
    }
}

/// Response from `DELETE /portfolio/orders/<id>`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderResponse {
    pub order_id: String,
    pub lifecycle_status: OrderLifecycleStatus,
    pub raw_status: String,
}

impl CancelOrderResponse {
    /// Parses a cancellation response, falling back to the requested order id
    /// when the exchange omits it.
    ///
    /// # Errors
    ///
    /// Returns a schema-validation [`ConnectorError`] when no order id can be
    /// determined.
    pub fn from_exchange(payload: &Value, fallback_order_id: &str) -> Result<Self, ConnectorError> {
        let order_id = first_string(payload, &["order_id", "id"])
            .unwrap_or_else(|| fallback_order_id.to_string());
        if order_id.is_empty() {
            return Err(ConnectorError::schema("cancel response missing order_id"));
        }
        let raw_status = first_string(payload, &["status", "order_status"])
            .unwrap_or_else(|| "canceled".to_string());
        Ok(Self {
            order_id,
            lifecycle_status: normalize_exchange_status(&raw_status),
            raw_status,
        })
    }
}

/// Account balance snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioBalance {
    pub cash_balance: i64,
    pub available_balance: i64,
}

impl PortfolioBalance {
    /// Parses a balance response, accepting flat payloads or a nested
    /// `balance: {...}` object.
    ///
    /// # Errors
    ///
    /// Returns a schema-validation [`ConnectorError`] when the cash or
    /// available fields are missing.
    pub fn from_exchange(payload: &Value) -> Result<Self, ConnectorError> {
        let payload = match payload.get("balance") {
            Some(nested) if nested.is_object() => nested,
            _ => payload,
        };

        let cash = payload
            .get("cash")
            .or_else(|| payload.get("cash_balance"))
            .and_then(value_as_i64);
        let available = payload
            .get("available")
            .or_else(|| payload.get("available_balance"))
            .and_then(value_as_i64);

        match (cash, available) {
            (Some(cash_balance), Some(available_balance)) => Ok(Self {
                cash_balance,
                available_balance,
            }),
            _ => Err(ConnectorError::schema(
                "balance response missing cash/available fields",
            )),
        }
    }
}

fn parse_enum<T>(payload: &Value, key: &str, default: Option<T>) -> Result<T, ConnectorError>
where
    T: FromStr,
{
    match payload.get(key).and_then(Value::as_str) {
        Some(raw) => T::from_str(raw.trim())
            .map_err(|_| ConnectorError::schema(format!("invalid {key}: '{raw}'"))),
        None => default.ok_or_else(|| ConnectorError::schema(format!("{key} is required"))),
    }
}

fn int_field(payload: &Value, keys: &[&str]) -> i64 {
    keys.iter()
        .find_map(|key| payload.get(*key).and_then(value_as_i64))
        .unwrap_or(0)
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
