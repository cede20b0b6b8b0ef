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

//! Control envelopes and driver replies exchanged with the stream driver.
//!
//! The state machine performs no socket I/O itself; it emits
//! [`StreamEnvelope`] values and the driver answers [`StreamEnvelope::AwaitDisconnect`]
//! and [`StreamEnvelope::Sleep`] with a [`DriverReply`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::common::enums::StreamChannel;

/// Handler name advertised on subscribe envelopes so the driver can route
/// inbound frames to the message normalizer.
pub const SUBSCRIBE_HANDLER: &str = "process_market_data_message";

/// Control envelope emitted by the stream state machine.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEnvelope {
    /// Open the socket with the given signed headers.
    Connect {
        url: String,
        headers: HashMap<String, String>,
    },
    /// Subscribe one channel; re-issued by the driver after reconnects.
    Subscribe {
        channel: StreamChannel,
        url: String,
        headers: HashMap<String, String>,
        handler: String,
        resubscribe: bool,
    },
    /// Block until the socket closes, then reply with a disconnect notice.
    AwaitDisconnect,
    /// Health-state transition notification.
    HealthState {
        state: HealthState,
        reason: HealthReason,
        attempt: u32,
    },
    /// A reconnect has been scheduled after a transient disconnect.
    ReconnectScheduled {
        attempt: u32,
        backoff_seconds: f64,
        close_type: DisconnectClass,
    },
    /// Sleep the given backoff, then reply with `{stable_connect}`.
    Sleep { seconds: f64 },
}

/// Stream health as published to consumers.
#[derive(
    Copy, Clone, Debug, Display, PartialEq, Eq, AsRefStr, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum HealthState {
    Healthy,
    Degraded,
}

/// Why the health state changed.
#[derive(
    Copy, Clone, Debug, Display, PartialEq, Eq, AsRefStr, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum HealthReason {
    AuthFailure,
    RepeatedDisconnects,
    MaxRetryWindowReached,
    StableConnectionRestored,
}

/// Classification of a socket disconnect.
#[derive(
    Copy, Clone, Debug, Display, PartialEq, Eq, AsRefStr, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DisconnectClass {
    Clean,
    AuthFailure,
    Transient,
}

/// Disconnect notice supplied by the driver after `AwaitDisconnect`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DisconnectNotice {
    #[serde(default)]
    pub clean: Option<bool>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl DisconnectNotice {
    /// Classifies the disconnect per the reconnect policy.
    #[must_use]
    pub fn classify(&self) -> DisconnectClass {
        if self.clean == Some(true) {
            return DisconnectClass::Clean;
        }
        if matches!(self.status_code, Some(401) | Some(403)) {
            return DisconnectClass::AuthFailure;
        }
        if let Some(reason) = &self.reason {
            let lowered = reason.to_lowercase();
            if ["auth", "credential", "token"]
                .iter()
                .any(|needle| lowered.contains(needle))
            {
                return DisconnectClass::AuthFailure;
            }
        }
        DisconnectClass::Transient
    }
}

/// Reply sent by the driver in answer to a control envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum DriverReply {
    /// Answer to `AwaitDisconnect`.
    Disconnected(DisconnectNotice),
    /// Answer to `Sleep`; reports whether the reconnected session held
    /// stable long enough to reset retry counters.
    Resumed { stable_connect: bool },
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
