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

//! Readiness primitive gating strategy execution on rehydrated state.

use std::{sync::Mutex, time::Duration};

use serde::Serialize;
use tokio::sync::watch;

use super::rehydration::RehydrationError;

/// Health-endpoint view of the gate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub ready: bool,
    pub last_error: Option<String>,
    pub last_rehydrated_at: Option<String>,
}

#[derive(Debug, Default)]
struct GateMeta {
    last_error: Option<String>,
    last_rehydrated_at: Option<String>,
}

/// Readiness primitive used by strategy runners and health endpoints.
#[derive(Debug)]
pub struct StateReadinessGate {
    ready_tx: watch::Sender<bool>,
    meta: Mutex<GateMeta>,
}

impl Default for StateReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StateReadinessGate {
    /// Creates a new [`StateReadinessGate`] in the not-ready state.
    #[must_use]
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            ready_tx,
            meta: Mutex::new(GateMeta::default()),
        }
    }

    /// Marks the gate ready, clearing the last error.
    pub fn mark_ready(&self, rehydrated_at: &str) {
        {
            let mut meta = self.meta.lock().expect("gate mutex poisoned");
            meta.last_error = None;
            meta.last_rehydrated_at = Some(rehydrated_at.to_string());
        }
        let _ = self.ready_tx.send(true);
    }

    /// Marks the gate not ready with the blocking error.
    pub fn mark_not_ready(&self, error: &str) {
        {
            let mut meta = self.meta.lock().expect("gate mutex poisoned");
            meta.last_error = Some(error.to_string());
        }
        let _ = self.ready_tx.send(false);
    }

    /// Returns whether the gate is currently ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Waits until the gate becomes ready; `timeout = None` waits forever.
    /// Returns `false` on timeout.
    pub async fn wait_until_ready(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.ready_tx.subscribe();
        let wait = rx.wait_for(|ready| *ready);
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait).await.is_ok_and(|r| r.is_ok()),
            None => wait.await.is_ok(),
        }
    }

    /// Gates strategy execution on readiness.
    ///
    /// # Errors
    ///
    /// Returns [`RehydrationError::Blocked`] carrying the last error when the
    /// gate is not ready.
    pub fn assert_ready(&self) -> Result<(), RehydrationError> {
        if self.is_ready() {
            return Ok(());
        }
        let meta = self.meta.lock().expect("gate mutex poisoned");
        let message = meta
            .last_error
            .clone()
            .unwrap_or_else(|| "state is not ready".to_string());
        Err(RehydrationError::Blocked(message))
    }

    /// Returns the health-endpoint snapshot.
    #[must_use]
    pub fn snapshot(&self) -> GateSnapshot {
        let meta = self.meta.lock().expect("gate mutex poisoned");
        GateSnapshot {
            ready: self.is_ready(),
            last_error: meta.last_error.clone(),
            last_rehydrated_at: meta.last_rehydrated_at.clone(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
