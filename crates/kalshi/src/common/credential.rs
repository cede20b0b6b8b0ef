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

//! API credential utilities for signing Kalshi requests.

use std::{collections::HashMap, fmt::Debug};

use aws_lc_rs::hmac;
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use ustr::Ustr;
use zeroize::ZeroizeOnDrop;

use crate::common::consts::{
    KALSHI_ACCESS_KEY_HEADER, KALSHI_ACCESS_SIGNATURE_HEADER, KALSHI_ACCESS_TIMESTAMP_HEADER,
};

/// Kalshi API credentials for signing requests.
///
/// Signatures are HMAC-SHA256 over `timestamp || METHOD || path || body`,
/// base64 encoded. Signatures are stateless; no nonce is involved.
/// Secrets are automatically zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Credential {
    #[zeroize(skip)]
    pub api_key_id: Ustr,
    api_key_secret: Box<[u8]>,
}

impl Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(Credential))
            .field("api_key_id", &self.api_key_id)
            .field("api_key_secret", &"<redacted>")
            .finish()
    }
}

impl Credential {
    /// Creates a new [`Credential`] instance.
    #[must_use]
    pub fn new(api_key_id: String, api_key_secret: String) -> Self {
        Self {
            api_key_id: api_key_id.into(),
            api_key_secret: api_key_secret.into_bytes().into_boxed_slice(),
        }
    }

    /// Signs a request message according to the Kalshi authentication scheme.
    ///
    /// `path` must be the canonical request path: leading slash, no query.
    #[must_use]
    pub fn sign(&self, timestamp_ms: i64, method: &str, path: &str, body: &str) -> String {
        let payload = format!("{timestamp_ms}{}{path}{body}", method.to_uppercase());
        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.api_key_secret[..]);
        let signature = hmac::sign(&key, payload.as_bytes());
        STANDARD.encode(signature.as_ref())
    }

    /// Produces the three signed headers for a request at the current wall clock.
    #[must_use]
    pub fn signed_headers(&self, method: &str, path: &str, body: &str) -> HashMap<String, String> {
        let timestamp_ms = Utc::now().timestamp_millis();
        self.signed_headers_at(timestamp_ms, method, path, body)
    }

    /// Produces the three signed headers for a fixed timestamp.
    #[must_use]
    pub fn signed_headers_at(
        &self,
        timestamp_ms: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> HashMap<String, String> {
        let signature = self.sign(timestamp_ms, method, path, body);
        HashMap::from([
            (
                KALSHI_ACCESS_KEY_HEADER.to_string(),
                self.api_key_id.to_string(),
            ),
            (
                KALSHI_ACCESS_TIMESTAMP_HEADER.to_string(),
                timestamp_ms.to_string(),
            ),
            (KALSHI_ACCESS_SIGNATURE_HEADER.to_string(), signature),
        ])
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use rstest::rstest;

    use super::*;

    const API_KEY_ID: &str = "key-1";
    const API_KEY_SECRET: &str = "super-secret-bytes";

    #[rstest]
    fn test_signature_deterministic_for_fixed_clock() {
        let credential = Credential::new(API_KEY_ID.to_string(), API_KEY_SECRET.to_string());

        let first = credential.sign(1_700_000_000_000, "POST", "/portfolio/orders", "{\"x\":1}");
        let second = credential.sign(1_700_000_000_000, "POST", "/portfolio/orders", "{\"x\":1}");

        assert_eq!(first, second);
    }

    #[rstest]
    fn test_signature_is_base64_sha256_digest() {
        let credential = Credential::new(API_KEY_ID.to_string(), API_KEY_SECRET.to_string());

        let signature = credential.sign(1_700_000_000_000, "GET", "/portfolio/balance", "");
        let decoded = STANDARD.decode(&signature).unwrap();

        assert_eq!(decoded.len(), 32);
    }

    #[rstest]
    #[case("get")]
    #[case("GET")]
    #[case("GeT")]
    fn test_method_is_uppercased_before_signing(#[case] method: &str) {
        let credential = Credential::new(API_KEY_ID.to_string(), API_KEY_SECRET.to_string());

        let reference = credential.sign(1, "GET", "/portfolio/balance", "");
        let signature = credential.sign(1, method, "/portfolio/balance", "");

        assert_eq!(signature, reference);
    }

    #[rstest]
    fn test_signature_varies_with_inputs() {
        let credential = Credential::new(API_KEY_ID.to_string(), API_KEY_SECRET.to_string());

        let base = credential.sign(1, "GET", "/portfolio/balance", "");

        assert_ne!(credential.sign(2, "GET", "/portfolio/balance", ""), base);
        assert_ne!(credential.sign(1, "POST", "/portfolio/balance", ""), base);
        assert_ne!(credential.sign(1, "GET", "/portfolio/orders", ""), base);
        assert_ne!(credential.sign(1, "GET", "/portfolio/balance", "{}"), base);
    }

    #[rstest]
    fn test_signed_headers_at_contains_exact_headers() {
        let credential = Credential::new(API_KEY_ID.to_string(), API_KEY_SECRET.to_string());

        let headers = credential.signed_headers_at(42, "GET", "/marketdata/stream", "");

        assert_eq!(headers.len(), 3);
        assert_eq!(headers["KALSHI-ACCESS-KEY"], API_KEY_ID);
        assert_eq!(headers["KALSHI-ACCESS-TIMESTAMP"], "42");
        assert_eq!(
            headers["KALSHI-ACCESS-SIGNATURE"],
            credential.sign(42, "GET", "/marketdata/stream", "")
        );
    }

    #[rstest]
    fn test_debug_redacts_secret() {
        let credential = Credential::new(API_KEY_ID.to_string(), API_KEY_SECRET.to_string());

        let dbg_out = format!("{credential:?}");

        assert!(dbg_out.contains("<redacted>"));
        assert!(!dbg_out.contains("super-secret"));
    }
}
