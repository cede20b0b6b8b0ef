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

//! Concrete Kalshi connector satisfying all three capability interfaces.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    common::credential::Credential,
    config::KalshiConfig,
    error::ConnectorError,
    http::{
        client::{HttpSession, KalshiHttpClient},
        models::{
            CancelOrderResponse, OrderDetails, PlaceOrderRequest, PlaceOrderResponse,
            PortfolioBalance,
        },
    },
    interfaces::{AccountReadClient, EventPublisher, MarketDataStream, OrderExecutionClient},
    ratelimit::SharedRateLimiter,
    websocket::{
        parse::MarketDataNormalizer,
        stream::{StreamHandle, spawn_stream},
    },
};

/// Concrete connector implementation used behind the capability interfaces.
#[derive(Clone, Debug)]
pub struct KalshiClient {
    config: KalshiConfig,
    http: KalshiHttpClient,
    credential: Credential,
    limiter: Arc<SharedRateLimiter>,
    normalizer: MarketDataNormalizer,
}

impl KalshiClient {
    /// Creates a new [`KalshiClient`] instance.
    #[must_use]
    pub fn new(
        config: KalshiConfig,
        limiter: Arc<SharedRateLimiter>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            http: KalshiHttpClient::new(&config, Arc::clone(&limiter)),
            credential: Credential::new(config.api_key_id.clone(), config.api_key_secret.clone()),
            normalizer: MarketDataNormalizer::new(publisher),
            limiter,
            config,
        }
    }

    /// Creates a new [`KalshiClient`] over an injected HTTP session.
    #[must_use]
    pub fn with_session(
        config: KalshiConfig,
        limiter: Arc<SharedRateLimiter>,
        publisher: Arc<dyn EventPublisher>,
        session: Arc<dyn HttpSession>,
    ) -> Self {
        Self {
            http: KalshiHttpClient::with_session(&config, Arc::clone(&limiter), session),
            credential: Credential::new(config.api_key_id.clone(), config.api_key_secret.clone()),
            normalizer: MarketDataNormalizer::new(publisher),
            limiter,
            config,
        }
    }

    /// Returns the connector configuration.
    #[must_use]
    pub const fn config(&self) -> &KalshiConfig {
        &self.config
    }
}

#[async_trait]
impl MarketDataStream for KalshiClient {
    fn stream_market_data(&self, channels: &[String]) -> StreamHandle {
        spawn_stream(
            self.config.websocket_url.clone(),
            self.credential.clone(),
            Arc::clone(&self.limiter),
            self.config.stream_reconnect,
            channels,
        )
    }

    async fn process_market_data_message(
        &self,
        raw: &Value,
    ) -> Result<Vec<Value>, ConnectorError> {
        self.normalizer.process(raw).await
    }
}

#[async_trait]
impl OrderExecutionClient for KalshiClient {
    async fn place_order(
        &self,
        request: &PlaceOrderRequest,
    ) -> Result<PlaceOrderResponse, ConnectorError> {
        self.http.place_order(request).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOrderResponse, ConnectorError> {
        self.http.cancel_order(order_id).await
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderDetails, ConnectorError> {
        self.http.get_order(order_id).await
    }
}

#[async_trait]
impl AccountReadClient for KalshiClient {
    async fn get_balance(&self) -> Result<PortfolioBalance, ConnectorError> {
        self.http.get_balance().await
    }

    async fn get_open_orders(&self) -> Result<Value, ConnectorError> {
        self.http.get_open_orders().await
    }

    async fn get_positions(&self) -> Result<Value, ConnectorError> {
        self.http.get_positions().await
    }
}
