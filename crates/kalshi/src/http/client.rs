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

//! Provides the HTTP client integration for the Kalshi REST API.
//!
//! Every request flows through the same pipeline: sign → rate-limit → send →
//! retry-on-transient → parse into a typed DTO. Transport is abstracted
//! behind the [`HttpSession`] trait so the pipeline is testable without
//! sockets; [`ReqwestSession`] is the production implementation.

use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::{
    common::{credential::Credential, parse::canonical_json},
    config::{KalshiConfig, RetryConfig},
    error::{ConnectorError, ConnectorErrorCode},
    http::models::{
        CancelOrderResponse, OrderDetails, PlaceOrderRequest, PlaceOrderResponse, PortfolioBalance,
    },
    ratelimit::{RateLimitBucket, SharedRateLimiter},
};

/// Raw HTTP response handed back by a session.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Vec<u8>,
}

/// Transport-level failure from a session.
#[derive(Debug, Clone, Error)]
pub enum HttpSessionError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<HttpSessionError> for ConnectorError {
    fn from(error: HttpSessionError) -> Self {
        match &error {
            HttpSessionError::Timeout(_) => {
                Self::new(ConnectorErrorCode::Timeout, error.to_string())
            }
            HttpSessionError::Connect(_) => {
                Self::new(ConnectorErrorCode::NetworkError, error.to_string())
            }
            HttpSessionError::Transport(_) => Self::from_message(error.to_string()),
        }
    }
}

/// Minimal HTTP session abstraction used by the request pipeline.
#[async_trait]
pub trait HttpSession: Send + Sync + Debug {
    /// Issues one HTTP request and returns the raw response.
    ///
    /// # Errors
    ///
    /// Returns [`HttpSessionError`] on transport failure; non-2xx statuses
    /// are returned as ordinary responses.
    async fn request(
        &self,
        method: Method,
        url: String,
        body: Option<String>,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpSessionError>;
}

/// Production session backed by [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestSession {
    client: reqwest::Client,
}

impl ReqwestSession {
    /// Creates a new [`ReqwestSession`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpSession for ReqwestSession {
    async fn request(
        &self,
        method: Method,
        url: String,
        body: Option<String>,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<HttpResponse, HttpSessionError> {
        let mut request = self.client.request(method, url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status_code = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(map_reqwest_error)?
            .to_vec();

        Ok(HttpResponse { status_code, body })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> HttpSessionError {
    if error.is_timeout() {
        HttpSessionError::Timeout(error.to_string())
    } else if error.is_connect() {
        HttpSessionError::Connect(error.to_string())
    } else {
        HttpSessionError::Transport(error.to_string())
    }
}

/// Signed HTTP client for the Kalshi REST API.
#[derive(Debug, Clone)]
pub struct KalshiHttpClient {
    base_url: String,
    credential: Credential,
    session: Arc<dyn HttpSession>,
    limiter: Arc<SharedRateLimiter>,
    retry: RetryConfig,
    timeout: Duration,
}

impl KalshiHttpClient {
    /// Creates a new [`KalshiHttpClient`] using the production session.
    #[must_use]
    pub fn new(config: &KalshiConfig, limiter: Arc<SharedRateLimiter>) -> Self {
        Self::with_session(config, limiter, Arc::new(ReqwestSession::new()))
    }

    /// Creates a new [`KalshiHttpClient`] over an injected session.
    #[must_use]
    pub fn with_session(
        config: &KalshiConfig,
        limiter: Arc<SharedRateLimiter>,
        session: Arc<dyn HttpSession>,
    ) -> Self {
        Self {
            // Trailing slash so `Url::join` appends under the API prefix.
            base_url: format!("{}/", config.base_url.trim_end_matches('/')),
            credential: Credential::new(
                config.api_key_id.clone(),
                config.api_key_secret.clone(),
            ),
            session,
            limiter,
            retry: config.retry,
            timeout: Duration::from_secs_f64(config.timeout_seconds),
        }
    }

    /// Places a new order after validating the request DTO.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on validation failure, transport failure,
    /// or a malformed exchange response.
    pub async fn place_order(
        &self,
        request: &PlaceOrderRequest,
    ) -> Result<PlaceOrderResponse, ConnectorError> {
        request.validate()?;
        let payload = request.to_exchange_payload();
        let response = self
            .send_request(
                Method::POST,
                "/portfolio/orders",
                Some(&payload),
                request.idempotency_key.as_deref(),
            )
            .await?;
        PlaceOrderResponse::from_exchange(&response)
    }

    /// Cancels an open order.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on transport failure or a malformed
    /// exchange response.
    pub async fn cancel_order(&self, order_id: &str) -> Result<CancelOrderResponse, ConnectorError> {
        let path = format!("/portfolio/orders/{order_id}");
        let response = self.send_request(Method::DELETE, &path, None, None).await?;
        CancelOrderResponse::from_exchange(&response, order_id)
    }

    /// Fetches an order by id.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on transport failure or a malformed
    /// exchange response.
    pub async fn get_order(&self, order_id: &str) -> Result<OrderDetails, ConnectorError> {
        let path = format!("/portfolio/orders/{order_id}");
        let response = self.send_request(Method::GET, &path, None, None).await?;
        let order_payload = match response.get("order") {
            Some(nested) if nested.is_object() => nested,
            _ => &response,
        };
        OrderDetails::from_exchange(order_payload)
    }

    /// Reads the account balance snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on transport failure or a malformed
    /// exchange response.
    pub async fn get_balance(&self) -> Result<PortfolioBalance, ConnectorError> {
        let response = self
            .send_request(Method::GET, "/portfolio/balance", None, None)
            .await?;
        PortfolioBalance::from_exchange(&response)
    }

    /// Reads the open orders snapshot as a raw mapping (the rehydrator parses).
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on transport failure.
    pub async fn get_open_orders(&self) -> Result<Value, ConnectorError> {
        self.send_request(Method::GET, "/portfolio/orders", None, None)
            .await
    }

    /// Reads the open positions snapshot as a raw mapping (the rehydrator parses).
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] on transport failure.
    pub async fn get_positions(&self) -> Result<Value, ConnectorError> {
        self.send_request(Method::GET, "/portfolio/positions", None, None)
            .await
    }

    async fn send_request(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
        idempotency_key: Option<&str>,
    ) -> Result<Value, ConnectorError> {
        let body = payload.map(canonical_json);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self
                .try_send(&method, path, body.as_deref(), idempotency_key)
                .await
            {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.retry.max_attempts || !error.code.is_retryable() {
                        return Err(error);
                    }
                    let delay = self.retry.backoff_seconds * f64::from(attempt);
                    tracing::debug!(
                        %method,
                        path,
                        attempt,
                        delay_seconds = delay,
                        error = %error,
                        "retrying transient request failure",
                    );
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
            }
        }
    }

    async fn try_send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<Value, ConnectorError> {
        let bucket = if *method == Method::GET {
            RateLimitBucket::Read
        } else {
            RateLimitBucket::Write
        };
        let operation = format!("http:{method}:{path}");
        self.limiter.acquire_async(bucket, &operation).await?;

        let mut headers = self
            .credential
            .signed_headers(method.as_str(), path, body.unwrap_or(""));
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        if let Some(key) = idempotency_key {
            headers.insert("Idempotency-Key".to_string(), key.to_string());
        }

        let url = self.request_url(path)?;
        let response = self
            .session
            .request(
                method.clone(),
                url.into(),
                body.map(ToString::to_string),
                headers,
                self.timeout,
            )
            .await?;

        if response.status_code >= 400 {
            let text = String::from_utf8_lossy(&response.body).to_string();
            return Err(ConnectorError::from_status(response.status_code, text));
        }
        if response.body.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_slice(&response.body).map_err(Into::into)
    }

    fn request_url(&self, path: &str) -> Result<Url, ConnectorError> {
        let base = Url::parse(&self.base_url).map_err(|error| {
            ConnectorError::new(
                ConnectorErrorCode::BadRequest,
                format!("invalid base_url '{}': {error}", self.base_url),
            )
        })?;
        base.join(path.trim_start_matches('/')).map_err(|error| {
            ConnectorError::new(
                ConnectorErrorCode::BadRequest,
                format!("invalid request path '{path}': {error}"),
            )
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{
        common::enums::{OrderAction, OrderLifecycleStatus, OrderSide, OrderType},
        config::RateLimitConfig,
    };

    #[derive(Debug)]
    struct RecordedRequest {
        method: Method,
        url: String,
        body: Option<String>,
        headers: HashMap<String, String>,
    }

    #[derive(Debug)]
    enum CannedResponse {
        Reply(u16, Value),
        Fail(HttpSessionError),
    }

    #[derive(Debug)]
    struct DummySession {
        responses: Mutex<Vec<CannedResponse>>,
        requests: Mutex<Vec<RecordedRequest>>,
    }

    impl DummySession {
        fn new(responses: Vec<CannedResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpSession for DummySession {
        async fn request(
            &self,
            method: Method,
            url: String,
            body: Option<String>,
            headers: HashMap<String, String>,
            _timeout: Duration,
        ) -> Result<HttpResponse, HttpSessionError> {
            self.requests.lock().unwrap().push(RecordedRequest {
                method,
                url,
                body,
                headers,
            });
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(HttpResponse {
                    status_code: 200,
                    body: b"{}".to_vec(),
                });
            }
            match responses.remove(0) {
                CannedResponse::Reply(status_code, payload) => Ok(HttpResponse {
                    status_code,
                    body: serde_json::to_vec(&payload).unwrap(),
                }),
                CannedResponse::Fail(error) => Err(error),
            }
        }
    }

    fn build_client(
        session: Arc<DummySession>,
        retry: RetryConfig,
        rate_limit: RateLimitConfig,
    ) -> KalshiHttpClient {
        let config = KalshiConfig {
            api_key_id: "k".to_string(),
            api_key_secret: "s".to_string(),
            retry,
            rate_limit,
            ..Default::default()
        };
        let limiter = Arc::new(SharedRateLimiter::new(&config.rate_limit));
        KalshiHttpClient::with_session(&config, limiter, session)
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff_seconds: 0.0,
        }
    }

    fn open_rate_limit() -> RateLimitConfig {
        RateLimitConfig {
            read_requests_per_second: 100.0,
            write_requests_per_second: 100.0,
            wait_timeout_seconds: 0.0,
        }
    }

    fn limit_order() -> PlaceOrderRequest {
        PlaceOrderRequest {
            market_id: "KXTEST".to_string(),
            side: OrderSide::Yes,
            action: OrderAction::Buy,
            count: 10,
            order_type: OrderType::Limit,
            yes_price: Some(45),
            no_price: None,
            client_order_id: None,
            idempotency_key: Some("idem-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_place_order_signs_and_adds_idempotency_header() {
        let session = Arc::new(DummySession::new(vec![CannedResponse::Reply(
            200,
            json!({"order": {
                "order_id": "o-123",
                "ticker": "KXTEST",
                "side": "yes",
                "action": "buy",
                "count": 10,
                "filled_count": 0,
                "status": "queued",
            }}),
        )]));
        let client = build_client(Arc::clone(&session), fast_retry(3), open_rate_limit());

        let response = client.place_order(&limit_order()).await.unwrap();

        assert_eq!(response.order.order_id, "o-123");
        assert_eq!(response.order.lifecycle_status, OrderLifecycleStatus::Pending);

        let requests = session.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.method, Method::POST);
        assert!(request.url.ends_with("/portfolio/orders"));
        assert_eq!(request.headers["Idempotency-Key"], "idem-1");
        assert_eq!(request.headers["Content-Type"], "application/json");
        assert!(request.headers.contains_key("KALSHI-ACCESS-KEY"));
        assert!(request.headers.contains_key("KALSHI-ACCESS-TIMESTAMP"));
        assert!(request.headers.contains_key("KALSHI-ACCESS-SIGNATURE"));
        // Canonical body: sorted keys, compact separators.
        let body = request.body.as_deref().unwrap();
        assert_eq!(
            body,
            r#"{"action":"buy","count":10,"side":"yes","ticker":"KXTEST","type":"limit","yes_price":45}"#
        );
    }

    #[tokio::test]
    async fn test_place_order_validation_short_circuits_transport() {
        let session = Arc::new(DummySession::new(vec![]));
        let client = build_client(Arc::clone(&session), fast_retry(3), open_rate_limit());

        let request = PlaceOrderRequest {
            yes_price: None,
            ..limit_order()
        };
        let error = client.place_order(&request).await.unwrap_err();

        assert_eq!(error.code, ConnectorErrorCode::SchemaValidation);
        assert_eq!(session.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_and_balance_parse_typed_responses() {
        let session = Arc::new(DummySession::new(vec![
            CannedResponse::Reply(200, json!({"status": "cancelled"})),
            CannedResponse::Reply(200, json!({"balance": {"cash": 1200, "available": 900}})),
        ]));
        let client = build_client(Arc::clone(&session), fast_retry(3), open_rate_limit());

        let canceled = client.cancel_order("o-456").await.unwrap();
        let balance = client.get_balance().await.unwrap();

        assert_eq!(canceled.order_id, "o-456");
        assert_eq!(canceled.lifecycle_status, OrderLifecycleStatus::Canceled);
        assert_eq!(balance.cash_balance, 1200);
        assert_eq!(balance.available_balance, 900);
    }

    #[tokio::test]
    async fn test_transient_network_failure_retries_then_succeeds() {
        let session = Arc::new(DummySession::new(vec![
            CannedResponse::Fail(HttpSessionError::Connect("connection refused".to_string())),
            CannedResponse::Reply(200, json!({"orders": []})),
        ]));
        let client = build_client(Arc::clone(&session), fast_retry(3), open_rate_limit());

        let response = client.get_open_orders().await.unwrap();

        assert_eq!(response, json!({"orders": []}));
        assert_eq!(session.request_count(), 2);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let session = Arc::new(DummySession::new(vec![CannedResponse::Reply(
            400,
            json!({"error": "bad order"}),
        )]));
        let client = build_client(Arc::clone(&session), fast_retry(3), open_rate_limit());

        let error = client.get_balance().await.unwrap_err();

        assert_eq!(error.code, ConnectorErrorCode::BadRequest);
        assert_eq!(error.status_code, Some(400));
        assert_eq!(session.request_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausts_on_persistent_timeouts() {
        let session = Arc::new(DummySession::new(vec![
            CannedResponse::Fail(HttpSessionError::Timeout("deadline elapsed".to_string())),
            CannedResponse::Fail(HttpSessionError::Timeout("deadline elapsed".to_string())),
            CannedResponse::Fail(HttpSessionError::Timeout("deadline elapsed".to_string())),
        ]));
        let client = build_client(Arc::clone(&session), fast_retry(3), open_rate_limit());

        let error = client.get_balance().await.unwrap_err();

        assert_eq!(error.code, ConnectorErrorCode::Timeout);
        assert_eq!(session.request_count(), 3);
    }

    #[tokio::test]
    async fn test_write_requests_can_be_dropped_by_rate_limiter() {
        let session = Arc::new(DummySession::new(vec![
            CannedResponse::Reply(200, json!({})),
            CannedResponse::Reply(200, json!({})),
        ]));
        let client = build_client(
            Arc::clone(&session),
            fast_retry(1),
            RateLimitConfig {
                read_requests_per_second: 50.0,
                write_requests_per_second: 1.0,
                wait_timeout_seconds: 0.0,
            },
        );

        client.cancel_order("o-1").await.unwrap();
        let error = client.cancel_order("o-2").await.unwrap_err();

        assert_eq!(error.code, ConnectorErrorCode::RateLimited);
        assert_eq!(session.request_count(), 1);
    }

    #[rstest]
    #[case("https://example.test/trade-api/v2")]
    #[case("https://example.test/trade-api/v2/")]
    fn test_request_url_joins_under_api_prefix(#[case] base_url: &str) {
        let config = KalshiConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        };
        let limiter = Arc::new(SharedRateLimiter::new(&config.rate_limit));
        let client = KalshiHttpClient::new(&config, limiter);

        let url = client.request_url("/portfolio/orders").unwrap();

        assert_eq!(
            url.as_str(),
            "https://example.test/trade-api/v2/portfolio/orders"
        );
    }

    #[rstest]
    fn test_request_url_rejects_unparsable_base() {
        let config = KalshiConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        let limiter = Arc::new(SharedRateLimiter::new(&config.rate_limit));
        let client = KalshiHttpClient::new(&config, limiter);

        let error = client.request_url("/portfolio/orders").unwrap_err();

        assert_eq!(error.code, ConnectorErrorCode::BadRequest);
    }
}
