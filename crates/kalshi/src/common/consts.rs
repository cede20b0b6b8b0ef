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

//! Constants for the Kalshi connector.

/// Identifier stamped on every canonical event envelope produced by this adapter.
pub const KALSHI_SOURCE: &str = "kalshi";

/// Default Kalshi trading API base URL.
pub const KALSHI_HTTP_URL: &str = "https://trading-api.kalshi.com/trade-api/v2";

/// Default Kalshi market-data WebSocket URL.
pub const KALSHI_WS_URL: &str = "wss://trading-api.kalshi.com/trade-api/ws/v2";

/// Canonical path signed for WebSocket connect/subscribe requests.
pub const KALSHI_WS_PATH: &str = "/marketdata/stream";

/// Header carrying the API key identifier.
pub const KALSHI_ACCESS_KEY_HEADER: &str = "KALSHI-ACCESS-KEY";

/// Header carrying the millisecond signing timestamp.
pub const KALSHI_ACCESS_TIMESTAMP_HEADER: &str = "KALSHI-ACCESS-TIMESTAMP";

/// Header carrying the base64 HMAC-SHA256 request signature.
pub const KALSHI_ACCESS_SIGNATURE_HEADER: &str = "KALSHI-ACCESS-SIGNATURE";

/// User agent advertised on HTTP requests.
pub const SIDECAR_USER_AGENT: &str = concat!("sidecar/", env!("CARGO_PKG_VERSION"));
