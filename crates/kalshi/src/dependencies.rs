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

//! Dependency wiring entry points for the connector capabilities.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    bus::InMemoryEventBus,
    client::KalshiClient,
    config::KalshiConfig,
    interfaces::{AccountReadClient, MarketDataStream, OrderExecutionClient},
    ratelimit::shared_rate_limiter,
};

const EVENT_BUS_CAPACITY: usize = 1_024;

/// Container exposing interface-typed connector dependencies.
///
/// All three capabilities are backed by one shared [`KalshiClient`];
/// `events` is the consumer side of the internal event bus.
#[derive(Debug)]
pub struct KalshiDependencies {
    pub market_data: Arc<dyn MarketDataStream>,
    pub orders: Arc<dyn OrderExecutionClient>,
    pub account: Arc<dyn AccountReadClient>,
    pub events: mpsc::Receiver<Value>,
}

/// Builds the default dependency graph for Kalshi integrations.
#[must_use]
pub fn build_kalshi_dependencies(config: Option<KalshiConfig>) -> KalshiDependencies {
    let config = config.unwrap_or_default();
    let limiter = shared_rate_limiter(&config.rate_limit);
    let (bus, events) = InMemoryEventBus::new(EVENT_BUS_CAPACITY);
    let client = Arc::new(KalshiClient::new(config, limiter, Arc::new(bus)));

    KalshiDependencies {
        market_data: Arc::clone(&client) as Arc<dyn MarketDataStream>,
        orders: Arc::clone(&client) as Arc<dyn OrderExecutionClient>,
        account: client as Arc<dyn AccountReadClient>,
        events,
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
