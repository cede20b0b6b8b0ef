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

//! Service-layer boundary mediating API requests to connectors/controllers.
//!
//! The UI order side (`buy_yes`…) decomposes into the exchange's
//! `(action, polarity)` pair, with the price routed to `yes_price` or
//! `no_price` by polarity.

use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
};

use serde::Serialize;

use sidecar_kalshi::{
    common::{
        enums::{OrderSide, OrderType, TradeSide},
        parse::utc_now_iso_millis,
    },
    error::ConnectorError,
    http::models::PlaceOrderRequest,
    interfaces::{AccountReadClient, OrderExecutionClient},
};

use super::contracts::{BalanceResponseV1, BotAction, BotControlResponseV1, BotStatus};

/// Opaque strategy/bot controller.
pub trait BotController: Send + Sync + Debug {
    /// Applies an action and returns the latest bot status.
    fn apply(&self, action: BotAction) -> BotStatus;
}

/// Default in-memory bot controller.
#[derive(Debug)]
pub struct InMemoryBotController {
    status: Mutex<BotStatus>,
}

impl Default for InMemoryBotController {
    fn default() -> Self {
        Self {
            status: Mutex::new(BotStatus::Stopped),
        }
    }
}

impl BotController for InMemoryBotController {
    fn apply(&self, action: BotAction) -> BotStatus {
        let mut status = self.status.lock().expect("bot controller mutex poisoned");
        *status = match action {
            BotAction::Start | BotAction::Resume => BotStatus::Running,
            BotAction::Stop => BotStatus::Stopped,
            BotAction::Pause => BotStatus::Paused,
        };
        *status
    }
}

/// Stable view of an order returned to the UI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderView {
    pub order_id: String,
    pub market_id: String,
    pub status: String,
    pub side: TradeSide,
    pub price: i64,
    pub quantity: i64,
    pub filled_quantity: i64,
    pub updated_at: String,
}

/// Stable view of a cancellation returned to the UI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CancelOrderView {
    pub order_id: String,
    pub status: String,
}

/// Service that mediates API requests from adapters to connectors/controllers.
#[derive(Debug)]
pub struct TradingApiService {
    orders: Arc<dyn OrderExecutionClient>,
    account: Arc<dyn AccountReadClient>,
    bot: Arc<dyn BotController>,
}

impl TradingApiService {
    /// Creates a new [`TradingApiService`] instance.
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderExecutionClient>,
        account: Arc<dyn AccountReadClient>,
        bot: Arc<dyn BotController>,
    ) -> Self {
        Self {
            orders,
            account,
            bot,
        }
    }

    /// Places an order for the UI, decomposing side polarity.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] from validation or the exchange call.
    pub async fn place_order(
        &self,
        market_id: &str,
        side: TradeSide,
        price: i64,
        quantity: i64,
        client_order_id: Option<String>,
    ) -> Result<OrderView, ConnectorError> {
        let polarity = side.polarity();
        let request = PlaceOrderRequest {
            market_id: market_id.to_string(),
            side: polarity,
            action: side.action(),
            count: quantity,
            order_type: OrderType::Limit,
            yes_price: (polarity == OrderSide::Yes).then_some(price),
            no_price: (polarity == OrderSide::No).then_some(price),
            client_order_id,
            idempotency_key: None,
        };
        let response = self.orders.place_order(&request).await?;

        Ok(OrderView {
            order_id: response.order.order_id,
            market_id: response.order.market_id,
            status: response.order.lifecycle_status.to_string(),
            side,
            price,
            quantity: response.order.quantity,
            filled_quantity: response.order.filled_quantity,
            updated_at: utc_now_iso_millis(),
        })
    }

    /// Cancels an order for the UI.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] from the exchange call.
    pub async fn cancel_order(&self, order_id: &str) -> Result<CancelOrderView, ConnectorError> {
        let response = self.orders.cancel_order(order_id).await?;
        Ok(CancelOrderView {
            order_id: response.order_id,
            status: response.lifecycle_status.to_string(),
        })
    }

    /// Reads the account balance in contract form.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] from the exchange call.
    pub async fn get_balance(&self) -> Result<BalanceResponseV1, ConnectorError> {
        Ok(self.account.get_balance().await?.into())
    }

    /// Delegates a bot control action to the injected controller.
    #[must_use]
    pub fn control_bot(&self, action: BotAction) -> BotControlResponseV1 {
        let status = self.bot.apply(action);
        BotControlResponseV1 {
            status,
            action,
            updated_at: utc_now_iso_millis(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::{Value, json};

    use sidecar_kalshi::{
        common::enums::{OrderAction, OrderLifecycleStatus},
        http::models::{CancelOrderResponse, OrderDetails, PlaceOrderResponse, PortfolioBalance},
    };

    use super::*;

    #[derive(Debug, Default)]
    struct FakeExecutionClient {
        last_request: Mutex<Option<PlaceOrderRequest>>,
    }

    #[async_trait]
    impl OrderExecutionClient for FakeExecutionClient {
        async fn place_order(
            &self,
            request: &PlaceOrderRequest,
        ) -> Result<PlaceOrderResponse, ConnectorError> {
            *self.last_request.lock().unwrap() = Some(request.clone());
            Ok(PlaceOrderResponse {
                order: OrderDetails {
                    order_id: "o-123".to_string(),
                    market_id: request.market_id.clone(),
                    side: request.side,
                    action: request.action,
                    quantity: request.count,
                    filled_quantity: 0,
                    lifecycle_status: OrderLifecycleStatus::Pending,
                    raw_status: "queued".to_string(),
                },
            })
        }

        async fn cancel_order(
            &self,
            order_id: &str,
        ) -> Result<CancelOrderResponse, ConnectorError> {
            Ok(CancelOrderResponse {
                order_id: order_id.to_string(),
                lifecycle_status: OrderLifecycleStatus::Canceled,
                raw_status: "cancelled".to_string(),
            })
        }

        async fn get_order(&self, _order_id: &str) -> Result<OrderDetails, ConnectorError> {
            unimplemented!("not exercised")
        }
    }

    #[derive(Debug)]
    struct FakeAccountClient;

    #[async_trait]
    impl AccountReadClient for FakeAccountClient {
        async fn get_balance(&self) -> Result<PortfolioBalance, ConnectorError> {
            Ok(PortfolioBalance {
                cash_balance: 1200,
                available_balance: 900,
            })
        }

        async fn get_open_orders(&self) -> Result<Value, ConnectorError> {
            Ok(json!({"orders": []}))
        }

        async fn get_positions(&self) -> Result<Value, ConnectorError> {
            Ok(json!({"positions": []}))
        }
    }

    fn service() -> (Arc<FakeExecutionClient>, TradingApiService) {
        let execution = Arc::new(FakeExecutionClient::default());
        let service = TradingApiService::new(
            Arc::clone(&execution) as Arc<dyn OrderExecutionClient>,
            Arc::new(FakeAccountClient),
            Arc::new(InMemoryBotController::default()),
        );
        (execution, service)
    }

    #[rstest]
    #[case(TradeSide::BuyYes, OrderAction::Buy, OrderSide::Yes)]
    #[case(TradeSide::SellYes, OrderAction::Sell, OrderSide::Yes)]
    #[case(TradeSide::BuyNo, OrderAction::Buy, OrderSide::No)]
    #[case(TradeSide::SellNo, OrderAction::Sell, OrderSide::No)]
    #[tokio::test]
    async fn test_side_decomposition_routes_price(
        #[case] side: TradeSide,
        #[case] expected_action: OrderAction,
        #[case] expected_polarity: OrderSide,
    ) {
        let (execution, service) = service();

        let view = service
            .place_order("KXTEST", side, 45, 10, Some("c-1".to_string()))
            .await
            .unwrap();

        let request = execution.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.action, expected_action);
        assert_eq!(request.side, expected_polarity);
        match expected_polarity {
            OrderSide::Yes => {
                assert_eq!(request.yes_price, Some(45));
                assert_eq!(request.no_price, None);
            }
            OrderSide::No => {
                assert_eq!(request.yes_price, None);
                assert_eq!(request.no_price, Some(45));
            }
        }
        assert_eq!(request.client_order_id, Some("c-1".to_string()));

        assert_eq!(view.order_id, "o-123");
        assert_eq!(view.side, side);
        assert_eq!(view.status, "pending");
        assert_eq!(view.price, 45);
    }

    #[tokio::test]
    async fn test_cancel_returns_normalized_status() {
        let (_, service) = service();
        let view = service.cancel_order("o-9").await.unwrap();
        assert_eq!(view.order_id, "o-9");
        assert_eq!(view.status, "canceled");
    }

    #[tokio::test]
    async fn test_balance_in_contract_form() {
        let (_, service) = service();
        let balance = service.get_balance().await.unwrap();
        assert_eq!(balance.cash_balance, 1200);
        assert_eq!(balance.contract_version, "1.0.0");
    }

    #[rstest]
    #[case(BotAction::Start, BotStatus::Running)]
    #[case(BotAction::Pause, BotStatus::Paused)]
    #[case(BotAction::Resume, BotStatus::Running)]
    #[case(BotAction::Stop, BotStatus::Stopped)]
    fn test_bot_control_transitions(#[case] action: BotAction, #[case] expected: BotStatus) {
        let (_, service) = service();
        let response = service.control_bot(action);
        assert_eq!(response.status, expected);
        assert_eq!(response.action, action);
        assert!(response.updated_at.ends_with('Z'));
    }
}
