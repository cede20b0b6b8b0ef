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

//! Capability interfaces for the Kalshi connector.
//!
//! The concrete [`crate::client::KalshiClient`] satisfies all three
//! capabilities; the composition root wires each seam by interface so test
//! doubles can stand in independently.

use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::ConnectorError,
    http::models::{
        CancelOrderResponse, OrderDetails, PlaceOrderRequest, PlaceOrderResponse, PortfolioBalance,
    },
    websocket::stream::StreamHandle,
};

/// Consumes real-time market data updates.
#[async_trait]
pub trait MarketDataStream: Send + Sync + Debug {
    /// Spawns a stream session for the requested channels and returns the
    /// driver-side handle.
    fn stream_market_data(&self, channels: &[String]) -> StreamHandle;

    /// Normalizes and publishes one raw frame, returning canonical events.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] when a supported channel's payload is
    /// malformed or publication fails.
    async fn process_market_data_message(&self, raw: &Value)
    -> Result<Vec<Value>, ConnectorError>;
}

/// Publishes normalized events to internal bus/queue consumers.
#[async_trait]
pub trait EventPublisher: Send + Sync + Debug {
    /// Publishes one normalized event envelope.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] when the bus is closed.
    async fn publish(&self, event: Value) -> Result<(), ConnectorError>;
}

/// Places and manages orders.
#[async_trait]
pub trait OrderExecutionClient: Send + Sync + Debug {
    /// Submits a new order.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on validation, transport, or response
    /// parse failure.
    async fn place_order(
        &self,
        request: &PlaceOrderRequest,
    ) -> Result<PlaceOrderResponse, ConnectorError>;

    /// Cancels an open order.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on transport or response parse failure.
    async fn cancel_order(&self, order_id: &str) -> Result<CancelOrderResponse, ConnectorError>;

    /// Fetches an order by id.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on transport or response parse failure.
    async fn get_order(&self, order_id: &str) -> Result<OrderDetails, ConnectorError>;
}

/// Reads account state from the exchange.
#[async_trait]
pub trait AccountReadClient: Send + Sync + Debug {
    /// Reads the account balance snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on transport or response parse failure.
    async fn get_balance(&self) -> Result<PortfolioBalance, ConnectorError>;

    /// Reads the open orders snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on transport failure.
    async fn get_open_orders(&self) -> Result<Value, ConnectorError>;

    /// Reads the open positions snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on transport failure.
    async fn get_positions(&self) -> Result<Value, ConnectorError>;
}
