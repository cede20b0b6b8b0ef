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

//! Inbound event ledger: migrations, schema verification, and the
//! single-writer persistence worker.

pub mod migrations;
pub mod writer;

use thiserror::Error;

/// Failures raised by ledger startup and persistence.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Startup checks detected an incompatible database schema or pragma.
    #[error("startup schema mismatch: {0}")]
    SchemaMismatch(String),
    /// The worker was used before `start` or after `stop`.
    #[error("ledger writer not started")]
    NotStarted,
    /// The worker task terminated abnormally.
    #[error("ledger writer task failed: {0}")]
    WorkerFailed(String),
    /// Any other storage error; fatal to the worker.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
