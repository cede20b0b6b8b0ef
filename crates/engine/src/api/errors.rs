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

//! Structured API errors aligned to the project error catalog.

use serde_json::{Value, json};
use strum::{AsRefStr, Display};
use thiserror::Error;

use sidecar_kalshi::error::{ConnectorError, ConnectorErrorCode};

/// Local API error kinds.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Hash, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ApiErrorKind {
    Auth,
    Validation,
    RateLimit,
    Network,
    Internal,
}

/// Stable catalog entry surfaced to UI users.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ErrorCatalogEntry {
    pub code: &'static str,
    pub user_message: &'static str,
}

/// Returns the catalog entry for one error kind.
#[must_use]
pub const fn catalog_entry(kind: ApiErrorKind) -> ErrorCatalogEntry {
    match kind {
        ApiErrorKind::Auth => ErrorCatalogEntry {
            code: "PT-AUTH-001",
            user_message: "API credentials are missing or invalid.",
        },
        ApiErrorKind::RateLimit => ErrorCatalogEntry {
            code: "PT-HTTP-429",
            user_message: "Too many requests sent. Retrying automatically.",
        },
        ApiErrorKind::Network => ErrorCatalogEntry {
            code: "PT-NET-001",
            user_message: "Cannot reach exchange services right now.",
        },
        ApiErrorKind::Validation | ApiErrorKind::Internal => ErrorCatalogEntry {
            code: "PT-INT-001",
            user_message: "Unexpected internal error occurred.",
        },
    }
}

/// Local API error carrying catalog kind and structured details.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{kind}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub details: Value,
}

impl ApiError {
    /// Creates a new [`ApiError`] with empty details.
    #[must_use]
    pub fn new(kind: ApiErrorKind) -> Self {
        Self {
            kind,
            details: json!({}),
        }
    }

    /// Creates a new [`ApiError`] with structured details.
    #[must_use]
    pub fn with_details(kind: ApiErrorKind, details: Value) -> Self {
        Self { kind, details }
    }

    /// Serializes the stable error envelope.
    #[must_use]
    pub fn payload(&self) -> Value {
        let entry = catalog_entry(self.kind);
        json!({
            "error": {
                "code": entry.code,
                "message": entry.user_message,
                "details": self.details,
            }
        })
    }
}

/// Classifies a connector error into `(http_status, ApiError)` for the
/// route adapter, preserving the upstream status when one exists.
#[must_use]
pub fn classify_connector_error(error: &ConnectorError) -> (u16, ApiError) {
    let kind = match error.code {
        ConnectorErrorCode::AuthenticationFailed | ConnectorErrorCode::AuthorizationFailed => {
            ApiErrorKind::Auth
        }
        ConnectorErrorCode::RateLimited => ApiErrorKind::RateLimit,
        ConnectorErrorCode::NetworkError | ConnectorErrorCode::Timeout => ApiErrorKind::Network,
        ConnectorErrorCode::BadRequest
        | ConnectorErrorCode::SchemaValidation
        | ConnectorErrorCode::NotFound => ApiErrorKind::Validation,
        ConnectorErrorCode::RemoteError | ConnectorErrorCode::Unknown => ApiErrorKind::Internal,
    };
    let status = error
        .status_code
        .unwrap_or_else(|| error.code.http_status_hint());
    let api_error = ApiError::with_details(
        kind,
        json!({
            "connector_code": error.code,
            "message": error.message,
        }),
    );
    (status, api_error)
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
