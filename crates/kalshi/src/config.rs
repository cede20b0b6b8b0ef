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

//! Configuration structures for the Kalshi connector.

use std::str::FromStr;

use anyhow::Context;

use crate::common::consts::{KALSHI_HTTP_URL, KALSHI_WS_URL};

/// Retry controls for HTTP calls.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per request (first try included).
    pub max_attempts: u32,
    /// Linear backoff unit; attempt `n` sleeps `backoff_seconds * n`.
    pub backoff_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_seconds: 0.5,
        }
    }
}

/// Shared rate-limiter controls for the `read` and `write` buckets.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimitConfig {
    /// Sliding-window capacity of the read bucket per second.
    pub read_requests_per_second: f64,
    /// Sliding-window capacity of the write bucket per second.
    pub write_requests_per_second: f64,
    /// Maximum queued wait before a request is dropped.
    pub wait_timeout_seconds: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read_requests_per_second: 10.0,
            write_requests_per_second: 5.0,
            wait_timeout_seconds: 1.0,
        }
    }
}

/// Reconnect controls for market-data streaming.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamReconnectConfig {
    pub base_backoff_seconds: f64,
    pub max_backoff_seconds: f64,
    /// Uniform jitter applied as `backoff * (1 ± jitter_ratio)`.
    pub jitter_ratio: f64,
    /// Total window of consecutive failures before the stream gives up.
    pub max_retry_window_seconds: f64,
    /// Uptime after which a session counts as stable and resets counters.
    /// Zero or negative disables the uptime-based reset.
    pub stable_connect_seconds: f64,
    /// Consecutive failures before the degraded health transition.
    pub degraded_after_attempts: u32,
}

impl Default for StreamReconnectConfig {
    fn default() -> Self {
        Self {
            base_backoff_seconds: 0.5,
            max_backoff_seconds: 10.0,
            jitter_ratio: 0.2,
            max_retry_window_seconds: 120.0,
            stable_connect_seconds: 30.0,
            degraded_after_attempts: 2,
        }
    }
}

/// Centralized connector configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct KalshiConfig {
    pub base_url: String,
    pub websocket_url: String,
    pub api_key_id: String,
    pub api_key_secret: String,
    pub timeout_seconds: f64,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub stream_reconnect: StreamReconnectConfig,
}

impl Default for KalshiConfig {
    fn default() -> Self {
        Self {
            base_url: KALSHI_HTTP_URL.to_string(),
            websocket_url: KALSHI_WS_URL.to_string(),
            api_key_id: String::new(),
            api_key_secret: String::new(),
            timeout_seconds: 10.0,
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            stream_reconnect: StreamReconnectConfig::default(),
        }
    }
}

impl KalshiConfig {
    /// Creates a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when both API credential fields are populated.
    #[must_use]
    pub fn has_api_credentials(&self) -> bool {
        !self.api_key_id.is_empty() && !self.api_key_secret.is_empty()
    }

    /// Builds the configuration from `KALSHI_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a numeric knob is set but unparsable.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            base_url: env_or("KALSHI_BASE_URL", defaults.base_url),
            websocket_url: env_or("KALSHI_WEBSOCKET_URL", defaults.websocket_url),
            api_key_id: env_or("KALSHI_API_KEY_ID", String::new()),
            api_key_secret: env_or("KALSHI_API_KEY_SECRET", String::new()),
            timeout_seconds: env_parsed("KALSHI_TIMEOUT_SECONDS", defaults.timeout_seconds)?,
            retry: RetryConfig {
                max_attempts: env_parsed("KALSHI_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                backoff_seconds: env_parsed(
                    "KALSHI_RETRY_BACKOFF_SECONDS",
                    defaults.retry.backoff_seconds,
                )?,
            },
            rate_limit: RateLimitConfig {
                read_requests_per_second: env_parsed(
                    "KALSHI_RATE_LIMIT_READ_RPS",
                    defaults.rate_limit.read_requests_per_second,
                )?,
                write_requests_per_second: env_parsed(
                    "KALSHI_RATE_LIMIT_WRITE_RPS",
                    defaults.rate_limit.write_requests_per_second,
                )?,
                wait_timeout_seconds: env_parsed(
                    "KALSHI_RATE_LIMIT_WAIT_TIMEOUT_SECONDS",
                    defaults.rate_limit.wait_timeout_seconds,
                )?,
            },
            stream_reconnect: StreamReconnectConfig {
                base_backoff_seconds: env_parsed(
                    "KALSHI_STREAM_RETRY_BASE_BACKOFF_SECONDS",
                    defaults.stream_reconnect.base_backoff_seconds,
                )?,
                max_backoff_seconds: env_parsed(
                    "KALSHI_STREAM_RETRY_MAX_BACKOFF_SECONDS",
                    defaults.stream_reconnect.max_backoff_seconds,
                )?,
                jitter_ratio: env_parsed(
                    "KALSHI_STREAM_RETRY_JITTER_RATIO",
                    defaults.stream_reconnect.jitter_ratio,
                )?,
                max_retry_window_seconds: env_parsed(
                    "KALSHI_STREAM_RETRY_MAX_WINDOW_SECONDS",
                    defaults.stream_reconnect.max_retry_window_seconds,
                )?,
                stable_connect_seconds: env_parsed(
                    "KALSHI_STREAM_RETRY_STABLE_CONNECT_SECONDS",
                    defaults.stream_reconnect.stable_connect_seconds,
                )?,
                degraded_after_attempts: env_parsed(
                    "KALSHI_STREAM_RETRY_DEGRADED_AFTER_ATTEMPTS",
                    defaults.stream_reconnect.degraded_after_attempts,
                )?,
            },
        })
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
