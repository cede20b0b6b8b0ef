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

//! Runtime half of the local trading sidecar.
//!
//! The `sidecar-engine` crate owns everything between the exchange connector
//! and the co-resident desktop UI: the single-writer event ledger persisted
//! to an embedded SQLite database, boot-time state rehydration against
//! exchange snapshots, the UI WebSocket fan-out with criticality-preserving
//! backpressure, the thin API service boundary, and the lifecycle
//! composition root that gates readiness through ordered startup and
//! shutdown.

#![warn(rustc::all)]
#![deny(unsafe_code)]
#![deny(nonstandard_style)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod api;
pub mod config;
pub mod ledger;
pub mod runtime;
pub mod state;

// Re-exports
pub use crate::{
    api::{fanout::UiConnectionManager, service::TradingApiService},
    config::{FanoutConfig, LedgerWriterConfig},
    ledger::writer::{InboundEvent, SqliteWriteWorker},
    runtime::{LifecycleState, SidecarCompositionRoot},
    state::{gate::StateReadinessGate, rehydration::StateRehydrator},
};
