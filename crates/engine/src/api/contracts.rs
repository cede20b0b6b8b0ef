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

//! Versioned API contract models for local engine endpoints (v1).

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use strum::{AsRefStr, Display, EnumString};

use sidecar_kalshi::{common::enums::TradeSide, http::models::PortfolioBalance};

use super::errors::{ApiError, ApiErrorKind};

/// Version stamped on v1 responses.
pub const CONTRACT_VERSION: &str = "1.0.0";

/// Bot control actions accepted by the local API.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BotAction {
    Start,
    Stop,
    Pause,
    Resume,
}

/// Bot lifecycle status reported back to the UI.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BotStatus {
    Running,
    Stopped,
    Paused,
}

/// `POST /orders` request body (v1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequestV1 {
    pub account_id: String,
    pub market_id: String,
    pub side: String,
    pub price: i64,
    pub quantity: i64,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

impl PlaceOrderRequestV1 {
    /// Parses and validates a request payload.
    ///
    /// # Errors
    ///
    /// Returns a `validation` [`ApiError`] naming the violated constraint.
    pub fn from_value(payload: &Value) -> Result<Self, ApiError> {
        let request: Self = serde_json::from_value(payload.clone())
            .map_err(|error| validation_error(&error.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Validates the contract constraints.
    ///
    /// # Errors
    ///
    /// Returns a `validation` [`ApiError`] naming the violated constraint.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.account_id.is_empty() {
            return Err(validation_error("account_id is required"));
        }
        if self.market_id.is_empty() {
            return Err(validation_error("market_id is required"));
        }
        if self.trade_side().is_err() {
            return Err(validation_error(
                "side must be one of: buy_yes, sell_yes, buy_no, sell_no",
            ));
        }
        if !(1..=99).contains(&self.price) {
            return Err(validation_error("price must be in [1, 99]"));
        }
        if self.quantity <= 0 {
            return Err(validation_error("quantity must be positive"));
        }
        Ok(())
    }

    /// Returns the typed trade side.
    ///
    /// # Errors
    ///
    /// Returns a `validation` [`ApiError`] for unrecognized sides.
    pub fn trade_side(&self) -> Result<TradeSide, ApiError> {
        self.side
            .parse::<TradeSide>()
            .map_err(|_| validation_error("side must be one of: buy_yes, sell_yes, buy_no, sell_no"))
    }
}

/// `POST /orders/cancel` request body (v1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderRequestV1 {
    pub order_id: String,
}

impl CancelOrderRequestV1 {
    /// Parses and validates a request payload.
    ///
    /// # Errors
    ///
    /// Returns a `validation` [`ApiError`] when `order_id` is missing.
    pub fn from_value(payload: &Value) -> Result<Self, ApiError> {
        let request: Self = serde_json::from_value(payload.clone())
            .map_err(|error| validation_error(&error.to_string()))?;
        if request.order_id.is_empty() {
            return Err(validation_error("order_id is required"));
        }
        Ok(request)
    }
}

/// `GET /balance` response body (v1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceResponseV1 {
    pub contract_version: String,
    pub cash_balance: i64,
    pub available_balance: i64,
}

impl From<PortfolioBalance> for BalanceResponseV1 {
    fn from(balance: PortfolioBalance) -> Self {
        Self {
            contract_version: CONTRACT_VERSION.to_string(),
            cash_balance: balance.cash_balance,
            available_balance: balance.available_balance,
        }
    }
}

/// `POST /bot/control` request body (v1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotControlRequestV1 {
    pub action: BotAction,
}

impl BotControlRequestV1 {
    /// Parses and validates a request payload.
    ///
    /// # Errors
    ///
    /// Returns a `validation` [`ApiError`] for unknown actions.
    pub fn from_value(payload: &Value) -> Result<Self, ApiError> {
        serde_json::from_value(payload.clone())
            .map_err(|_| validation_error("action must be one of: start, stop, pause, resume"))
    }
}

/// `POST /bot/control` response body (v1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotControlResponseV1 {
    pub status: BotStatus,
    pub action: BotAction,
    pub updated_at: String,
}

fn validation_error(reason: &str) -> ApiError {
    ApiError::with_details(ApiErrorKind::Validation, json!({"reason": reason}))
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn valid_order() -> Value {
        json!({
            "account_id": "acct-1",
            "market_id": "KXTEST",
            "side": "buy_yes",
            "price": 45,
            "quantity": 10,
        })
    }

    #[rstest]
    fn test_place_order_accepts_valid_payload() {
        let request = PlaceOrderRequestV1::from_value(&valid_order()).unwrap();
        assert_eq!(request.trade_side().unwrap(), TradeSide::BuyYes);
        assert_eq!(request.client_order_id, None);
    }

    #[rstest]
    #[case("account_id", json!(""), "account_id is required")]
    #[case("market_id", json!(""), "market_id is required")]
    #[case("side", json!("long"), "side must be one of: buy_yes, sell_yes, buy_no, sell_no")]
    #[case("price", json!(0), "price must be in [1, 99]")]
    #[case("price", json!(100), "price must be in [1, 99]")]
    #[case("quantity", json!(0), "quantity must be positive")]
    fn test_place_order_rejections(
        #[case] field: &str,
        #[case] value: Value,
        #[case] reason: &str,
    ) {
        let mut payload = valid_order();
        payload[field] = value;
        let error = PlaceOrderRequestV1::from_value(&payload).unwrap_err();
        assert_eq!(error.kind, ApiErrorKind::Validation);
        assert_eq!(error.details["reason"], reason);
    }

    #[rstest]
    fn test_cancel_requires_order_id() {
        let error = CancelOrderRequestV1::from_value(&json!({"order_id": ""})).unwrap_err();
        assert_eq!(error.details["reason"], "order_id is required");
    }

    #[rstest]
    fn test_balance_response_carries_contract_version() {
        let response: BalanceResponseV1 = PortfolioBalance {
            cash_balance: 1200,
            available_balance: 900,
        }
        .into();
        assert_eq!(response.contract_version, CONTRACT_VERSION);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "contract_version": "1.0.0",
                "cash_balance": 1200,
                "available_balance": 900,
            })
        );
    }

    #[rstest]
    fn test_bot_control_rejects_unknown_action() {
        let error = BotControlRequestV1::from_value(&json!({"action": "reboot"})).unwrap_err();
        assert_eq!(error.kind, ApiErrorKind::Validation);
    }
}
