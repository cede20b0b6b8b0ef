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

//! Configuration structures for the engine runtime.

/// Tuning knobs for the single-writer ledger worker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LedgerWriterConfig {
    /// Bounded inbound queue size; producers suspend when full.
    pub queue_maxsize: usize,
    /// Transient lock retries before a submission is routed to poison.
    pub lock_retry_limit: u32,
    /// Base for the randomized exponential lock-retry backoff.
    pub backoff_base_seconds: f64,
    /// Cap on any single lock-retry delay.
    pub backoff_cap_seconds: f64,
}

impl Default for LedgerWriterConfig {
    fn default() -> Self {
        Self {
            queue_maxsize: 5_000,
            lock_retry_limit: 5,
            backoff_base_seconds: 0.1,
            backoff_cap_seconds: 5.0,
        }
    }
}

/// Tuning knobs for the UI WebSocket fan-out manager.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FanoutConfig {
    /// Per-client queue bound; overflow applies the criticality policy.
    pub max_queue_size: usize,
    /// Minimum spacing between pings to one client.
    pub heartbeat_interval_seconds: f64,
    /// Idle time after which a client is evicted with close code 1001.
    pub stale_timeout_seconds: f64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 128,
            heartbeat_interval_seconds: 15.0,
            stale_timeout_seconds: 45.0,
        }
    }
}
