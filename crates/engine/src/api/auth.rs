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

//! Local trust-model auth and nonce guard for the sidecar API.
//!
//! Replay protection tracks the last accepted nonce per token in memory;
//! the counter resets on restart.

use std::{collections::HashMap, sync::Mutex};

use serde_json::json;

use super::errors::{ApiError, ApiErrorKind};

/// Header carrying the shared trusted token.
pub const AUTH_TOKEN_HEADER: &str = "x-pt-auth-token";
/// Header carrying the strictly increasing request nonce.
pub const AUTH_NONCE_HEADER: &str = "x-pt-nonce";

/// Shared-token + strictly-increasing-nonce request guard.
#[derive(Debug)]
pub struct AuthNonceGuard {
    expected_token: String,
    last_nonce_by_token: Mutex<HashMap<String, u64>>,
}

impl AuthNonceGuard {
    /// Creates a new [`AuthNonceGuard`] instance.
    #[must_use]
    pub fn new(expected_token: String) -> Self {
        Self {
            expected_token,
            last_nonce_by_token: Mutex::new(HashMap::new()),
        }
    }

    /// Validates the auth headers of one request.
    ///
    /// # Errors
    ///
    /// Returns an `auth` [`ApiError`] on token mismatch, missing/invalid
    /// nonce, or nonce replay.
    pub fn validate(&self, headers: &HashMap<String, String>) -> Result<(), ApiError> {
        let token = headers
            .get(AUTH_TOKEN_HEADER)
            .map(String::as_str)
            .unwrap_or_default();
        if token != self.expected_token {
            return Err(auth_error("invalid_token"));
        }

        let raw_nonce = headers
            .get(AUTH_NONCE_HEADER)
            .map(String::as_str)
            .unwrap_or_default();
        if raw_nonce.is_empty() {
            return Err(auth_error("missing_nonce"));
        }
        let nonce: u64 = raw_nonce
            .parse()
            .map_err(|_| auth_error("invalid_nonce"))?;

        let mut last_by_token = self
            .last_nonce_by_token
            .lock()
            .expect("nonce guard mutex poisoned");
        if let Some(previous) = last_by_token.get(token) {
            if nonce <= *previous {
                return Err(auth_error("replayed_nonce"));
            }
        }
        last_by_token.insert(token.to_string(), nonce);
        Ok(())
    }
}

fn auth_error(reason: &str) -> ApiError {
    ApiError::with_details(ApiErrorKind::Auth, json!({"reason": reason}))
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn headers(token: &str, nonce: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if !token.is_empty() {
            headers.insert(AUTH_TOKEN_HEADER.to_string(), token.to_string());
        }
        if !nonce.is_empty() {
            headers.insert(AUTH_NONCE_HEADER.to_string(), nonce.to_string());
        }
        headers
    }

    #[rstest]
    fn test_accepts_increasing_nonces() {
        let guard = AuthNonceGuard::new("trusted".to_string());
        guard.validate(&headers("trusted", "1")).unwrap();
        guard.validate(&headers("trusted", "2")).unwrap();
        guard.validate(&headers("trusted", "10")).unwrap();
    }

    #[rstest]
    #[case("wrong-token", "1", "invalid_token")]
    #[case("trusted", "", "missing_nonce")]
    #[case("trusted", "not-a-number", "invalid_nonce")]
    fn test_rejections(#[case] token: &str, #[case] nonce: &str, #[case] reason: &str) {
        let guard = AuthNonceGuard::new("trusted".to_string());
        let error = guard.validate(&headers(token, nonce)).unwrap_err();
        assert_eq!(error.kind, ApiErrorKind::Auth);
        assert_eq!(error.details["reason"], reason);
    }

    #[rstest]
    fn test_replayed_and_stale_nonces_rejected() {
        let guard = AuthNonceGuard::new("trusted".to_string());
        guard.validate(&headers("trusted", "5")).unwrap();

        for stale in ["5", "4"] {
            let error = guard.validate(&headers("trusted", stale)).unwrap_err();
            assert_eq!(error.details["reason"], "replayed_nonce");
        }
    }
}
