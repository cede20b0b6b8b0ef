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

//! Connector for the [Kalshi](https://kalshi.com) prediction-market exchange.
//!
//! The `sidecar-kalshi` crate provides the exchange-facing half of the local
//! trading sidecar: a signed HTTP client with shared rate limiting and a
//! normalized error taxonomy, the market-data stream state machine that
//! drives reconnect/backoff/degradation behavior, message normalization into
//! canonical event envelopes, and the in-process event bus those envelopes
//! are published to.
//!
//! The connector exposes its capabilities behind three independently
//! injectable interfaces ([`interfaces::MarketDataStream`],
//! [`interfaces::OrderExecutionClient`], [`interfaces::AccountReadClient`]),
//! all satisfied by the concrete [`client::KalshiClient`]. Socket I/O for the
//! market-data stream is performed by an external driver which answers the
//! control envelopes emitted by the state machine.

#![warn(rustc::all)]
#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod bus;
pub mod client;
pub mod common;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod http;
pub mod interfaces;
pub mod ratelimit;
pub mod websocket;

// Re-exports
pub use crate::{
    client::KalshiClient,
    common::credential::Credential,
    config::KalshiConfig,
    error::{ConnectorError, ConnectorErrorCode},
    http::client::KalshiHttpClient,
    ratelimit::{RateLimitBucket, SharedRateLimiter},
    websocket::stream::StreamHandle,
};
