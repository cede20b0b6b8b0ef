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

//! Error normalization for Kalshi integrations.
//!
//! Transport and remote failures are mapped onto a fixed [`ConnectorErrorCode`]
//! enumeration. The original upstream HTTP status (when one exists) is
//! preserved on the error so the local route adapter can classify responses.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Fixed taxonomy of normalized connector failures.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ConnectorErrorCode {
    AuthenticationFailed,
    AuthorizationFailed,
    NotFound,
    RateLimited,
    NetworkError,
    Timeout,
    BadRequest,
    SchemaValidation,
    RemoteError,
    Unknown,
}

impl ConnectorErrorCode {
    /// Whether the HTTP client may retry a request failing with this code.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::NetworkError | Self::Timeout | Self::RateLimited)
    }

    /// Suggested HTTP status for surfacing this code through the local API.
    #[must_use]
    pub const fn http_status_hint(self) -> u16 {
        match self {
            Self::AuthenticationFailed => 401,
            Self::AuthorizationFailed => 403,
            Self::NotFound => 404,
            Self::RateLimited => 429,
            Self::BadRequest | Self::SchemaValidation => 400,
            Self::NetworkError | Self::Timeout => 502,
            Self::RemoteError | Self::Unknown => 500,
        }
    }
}

/// Engine-level normalized connector error.
///
/// The upstream cause is flattened into `message`; `status_code` preserves
/// the remote HTTP status when the failure originated from a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ConnectorError {
    pub code: ConnectorErrorCode,
    pub message: String,
    pub status_code: Option<u16>,
}

impl ConnectorError {
    /// Creates a new [`ConnectorError`] instance.
    pub fn new(code: ConnectorErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: None,
        }
    }

    /// Creates a new [`ConnectorError`] carrying the upstream HTTP status.
    pub fn with_status(code: ConnectorErrorCode, message: impl Into<String>, status: u16) -> Self {
        Self {
            code,
            message: message.into(),
            status_code: Some(status),
        }
    }

    /// Convenience constructor for schema-validation failures.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorCode::SchemaValidation, message)
    }

    /// Maps an HTTP response status and body to a normalized error.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        let code = match status {
            400 => ConnectorErrorCode::BadRequest,
            401 => ConnectorErrorCode::AuthenticationFailed,
            403 => ConnectorErrorCode::AuthorizationFailed,
            404 => ConnectorErrorCode::NotFound,
            429 => ConnectorErrorCode::RateLimited,
            _ => match classify_message(&message) {
                Some(code) => code,
                None if status >= 500 => ConnectorErrorCode::RemoteError,
                None => ConnectorErrorCode::Unknown,
            },
        };
        Self::with_status(code, message, status)
    }

    /// Maps an arbitrary failure message to a normalized error by content.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let code = classify_message(&message).unwrap_or(ConnectorErrorCode::Unknown);
        Self::new(code, message)
    }
}

fn classify_message(message: &str) -> Option<ConnectorErrorCode> {
    let lowered = message.to_lowercase();
    if lowered.contains("timeout") {
        return Some(ConnectorErrorCode::Timeout);
    }
    if lowered.contains("connection") || lowered.contains("network") {
        return Some(ConnectorErrorCode::NetworkError);
    }
    None
}

impl From<serde_json::Error> for ConnectorError {
    fn from(error: serde_json::Error) -> Self {
        Self::schema(error.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
