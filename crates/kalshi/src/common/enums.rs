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

//! Enumerations for Kalshi order, trade, and stream concepts.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Contract polarity of an order (YES or NO side of a market).
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OrderSide {
    /// The YES side of the market.
    Yes,
    /// The NO side of the market.
    No,
}

/// Direction of an order.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OrderAction {
    Buy,
    Sell,
}

/// Execution type of an order.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OrderType {
    Limit,
    Market,
}

/// Normalized per-order lifecycle state.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OrderLifecycleStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    Unknown,
}

/// Combined direction and polarity used by trades and the local UI contract.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TradeSide {
    BuyYes,
    SellYes,
    BuyNo,
    SellNo,
}

impl TradeSide {
    /// Decomposes into the buy/sell action component.
    #[must_use]
    pub const fn action(self) -> OrderAction {
        match self {
            Self::BuyYes | Self::BuyNo => OrderAction::Buy,
            Self::SellYes | Self::SellNo => OrderAction::Sell,
        }
    }

    /// Decomposes into the yes/no polarity component.
    #[must_use]
    pub const fn polarity(self) -> OrderSide {
        match self {
            Self::BuyYes | Self::SellYes => OrderSide::Yes,
            Self::BuyNo | Self::SellNo => OrderSide::No,
        }
    }
}

/// Liquidity role of a trade participant.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LiquiditySide {
    Maker,
    Taker,
}

/// Market-data channels supported by the stream state machine.
#[derive(
    Copy,
    Clone,
    Debug,
    Display,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StreamChannel {
    OrderbookDelta,
    Trade,
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
