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

//! Shared process-level rate limiter for Kalshi control paths.
//!
//! Two independent one-second sliding-window buckets (`read` and `write`)
//! guard every outbound request. Both the blocking and the cooperative entry
//! point share the same bucket state behind one mutex; the
//! reserve/commit primitive is factored once so the two paths cannot drift.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, OnceLock},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::{
    config::RateLimitConfig,
    error::{ConnectorError, ConnectorErrorCode},
};

const WINDOW: Duration = Duration::from_secs(1);

/// Independent budget buckets keyed by request class.
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
pub enum RateLimitBucket {
    Read,
    Write,
}

/// Raised when queued waiting would exceed the configured timeout.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("rate limit exceeded for {bucket} bucket after waiting {timeout_seconds:.3}s")]
pub struct RateLimitExceededError {
    pub bucket: RateLimitBucket,
    pub timeout_seconds: f64,
}

impl From<RateLimitExceededError> for ConnectorError {
    fn from(error: RateLimitExceededError) -> Self {
        Self::with_status(ConnectorErrorCode::RateLimited, error.to_string(), 429)
    }
}

/// Counters exposed for observability.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimitMetrics {
    pub throttled_requests: u64,
    pub dropped_requests: u64,
}

#[derive(Debug)]
struct SlidingWindowBucket {
    requests_per_second: f64,
    events: VecDeque<Instant>,
}

impl SlidingWindowBucket {
    fn new(requests_per_second: f64) -> Self {
        Self {
            requests_per_second,
            events: VecDeque::new(),
        }
    }

    fn configure(&mut self, requests_per_second: f64) {
        // In-flight reservations are preserved across reconfiguration.
        self.requests_per_second = requests_per_second;
    }

    /// Reserves a slot immediately or returns the wait required for one.
    fn reserve_delay(&mut self, now: Instant) -> Option<Duration> {
        self.evict_old(now);
        if self.requests_per_second <= 0.0 {
            return Some(Duration::MAX);
        }

        let capacity = (self.requests_per_second as usize).max(1);
        if self.events.len() < capacity {
            self.events.push_back(now);
            return None;
        }

        let oldest = *self.events.front()?;
        let wait_for = (oldest + WINDOW).saturating_duration_since(now);
        if wait_for.is_zero() {
            self.events.pop_front();
            self.events.push_back(now);
            return None;
        }
        Some(wait_for)
    }

    fn commit_after_wait(&mut self, now: Instant) {
        self.evict_old(now);
        self.events.push_back(now);
    }

    fn evict_old(&mut self, now: Instant) {
        while let Some(front) = self.events.front() {
            if now.saturating_duration_since(*front) >= WINDOW {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    wait_timeout_seconds: f64,
    read: SlidingWindowBucket,
    write: SlidingWindowBucket,
    metrics: RateLimitMetrics,
}

impl LimiterState {
    fn bucket_mut(&mut self, bucket: RateLimitBucket) -> &mut SlidingWindowBucket {
        match bucket {
            RateLimitBucket::Read => &mut self.read,
            RateLimitBucket::Write => &mut self.write,
        }
    }
}

/// Thread-safe limiter shared by all connector clients in-process.
#[derive(Debug)]
pub struct SharedRateLimiter {
    state: Mutex<LimiterState>,
}

impl SharedRateLimiter {
    /// Creates a new [`SharedRateLimiter`] instance.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                wait_timeout_seconds: config.wait_timeout_seconds,
                read: SlidingWindowBucket::new(config.read_requests_per_second),
                write: SlidingWindowBucket::new(config.write_requests_per_second),
                metrics: RateLimitMetrics::default(),
            }),
        }
    }

    /// Updates bucket capacities, preserving in-flight reservations.
    pub fn configure(&self, config: &RateLimitConfig) {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        state.wait_timeout_seconds = config.wait_timeout_seconds;
        state.read.configure(config.read_requests_per_second);
        state.write.configure(config.write_requests_per_second);
    }

    /// Returns a copy of the current throttle/drop counters.
    #[must_use]
    pub fn metrics_snapshot(&self) -> RateLimitMetrics {
        self.state
            .lock()
            .expect("rate limiter mutex poisoned")
            .metrics
    }

    /// Acquires a slot in `bucket`, blocking the calling thread when queued.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceededError`] when the wait would exceed the
    /// configured timeout; the request is counted as dropped.
    pub fn acquire(
        &self,
        bucket: RateLimitBucket,
        operation: &str,
    ) -> Result<(), RateLimitExceededError> {
        match self.reserve(bucket, operation)? {
            None => Ok(()),
            Some(wait_for) => {
                std::thread::sleep(wait_for);
                self.commit(bucket);
                Ok(())
            }
        }
    }

    /// Acquires a slot in `bucket`, suspending the task when queued.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitExceededError`] when the wait would exceed the
    /// configured timeout; the request is counted as dropped.
    pub async fn acquire_async(
        &self,
        bucket: RateLimitBucket,
        operation: &str,
    ) -> Result<(), RateLimitExceededError> {
        match self.reserve(bucket, operation)? {
            None => Ok(()),
            Some(wait_for) => {
                tokio::time::sleep(wait_for).await;
                self.commit(bucket);
                Ok(())
            }
        }
    }

    fn reserve(
        &self,
        bucket: RateLimitBucket,
        operation: &str,
    ) -> Result<Option<Duration>, RateLimitExceededError> {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let timeout_seconds = state.wait_timeout_seconds;

        match state.bucket_mut(bucket).reserve_delay(now) {
            None => Ok(None),
            Some(wait_for) => {
                if wait_for.as_secs_f64() > timeout_seconds {
                    state.metrics.dropped_requests += 1;
                    tracing::warn!(
                        bucket = %bucket,
                        operation,
                        wait_seconds = wait_for.as_secs_f64(),
                        "rate limit dropped",
                    );
                    return Err(RateLimitExceededError {
                        bucket,
                        timeout_seconds,
                    });
                }
                state.metrics.throttled_requests += 1;
                tracing::info!(
                    bucket = %bucket,
                    operation,
                    wait_seconds = wait_for.as_secs_f64(),
                    "rate limit throttled",
                );
                Ok(Some(wait_for))
            }
        }
    }

    fn commit(&self, bucket: RateLimitBucket) {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        state.bucket_mut(bucket).commit_after_wait(now);
    }
}

static PROCESS_LIMITER: OnceLock<Arc<SharedRateLimiter>> = OnceLock::new();

/// Returns the process-wide limiter, creating it on first use and
/// reconfiguring it on subsequent calls.
///
/// The composition root initializes this once at startup; tests construct
/// [`SharedRateLimiter`] instances directly instead.
pub fn shared_rate_limiter(config: &RateLimitConfig) -> Arc<SharedRateLimiter> {
    if let Some(limiter) = PROCESS_LIMITER.get() {
        limiter.configure(config);
        return Arc::clone(limiter);
    }
    let limiter = Arc::new(SharedRateLimiter::new(config));
    match PROCESS_LIMITER.set(Arc::clone(&limiter)) {
        Ok(()) => limiter,
        // Lost the init race; defer to the winner.
        Err(_) => {
            let winner = PROCESS_LIMITER.get().expect("limiter initialized");
            winner.configure(config);
            Arc::clone(winner)
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn config(read: f64, write: f64, timeout: f64) -> RateLimitConfig {
        RateLimitConfig {
            read_requests_per_second: read,
            write_requests_per_second: write,
            wait_timeout_seconds: timeout,
        }
    }

    #[rstest]
    fn test_burst_within_capacity_is_immediate() {
        let limiter = SharedRateLimiter::new(&config(5.0, 5.0, 0.0));

        for i in 0..5 {
            assert!(
                limiter.acquire(RateLimitBucket::Read, "burst").is_ok(),
                "request {i} should be within capacity"
            );
        }

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.throttled_requests, 0);
        assert_eq!(metrics.dropped_requests, 0);
    }

    #[rstest]
    fn test_excess_requests_drop_with_zero_timeout() {
        let capacity = 3;
        let excess = 4;
        let limiter = SharedRateLimiter::new(&config(capacity as f64, 1.0, 0.0));

        let mut dropped = 0;
        for _ in 0..(capacity + excess) {
            if limiter.acquire(RateLimitBucket::Read, "burst").is_err() {
                dropped += 1;
            }
        }

        assert_eq!(dropped, excess);
        assert_eq!(limiter.metrics_snapshot().dropped_requests, excess as u64);
    }

    #[rstest]
    fn test_buckets_are_independent() {
        let limiter = SharedRateLimiter::new(&config(1.0, 1.0, 0.0));

        assert!(limiter.acquire(RateLimitBucket::Read, "r").is_ok());
        assert!(limiter.acquire(RateLimitBucket::Read, "r").is_err());
        assert!(limiter.acquire(RateLimitBucket::Write, "w").is_ok());
    }

    #[rstest]
    fn test_dropped_error_carries_429_hint() {
        let limiter = SharedRateLimiter::new(&config(1.0, 1.0, 0.0));
        limiter.acquire(RateLimitBucket::Write, "w").unwrap();

        let error: ConnectorError = limiter
            .acquire(RateLimitBucket::Write, "w")
            .unwrap_err()
            .into();

        assert_eq!(error.code, ConnectorErrorCode::RateLimited);
        assert_eq!(error.status_code, Some(429));
    }

    #[rstest]
    fn test_throttled_request_waits_then_commits() {
        let limiter = SharedRateLimiter::new(&config(1.0, 1.0, 2.0));

        limiter.acquire(RateLimitBucket::Read, "prime").unwrap();
        limiter.acquire(RateLimitBucket::Read, "throttle").unwrap();

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.throttled_requests, 1);
        assert_eq!(metrics.dropped_requests, 0);
    }

    #[tokio::test]
    async fn test_async_acquire_shares_state_with_sync() {
        let limiter = SharedRateLimiter::new(&config(1.0, 1.0, 0.0));

        limiter.acquire(RateLimitBucket::Read, "sync").unwrap();
        let result = limiter.acquire_async(RateLimitBucket::Read, "async").await;

        assert!(result.is_err());
    }

    #[rstest]
    fn test_reconfigure_preserves_reservations() {
        let limiter = SharedRateLimiter::new(&config(2.0, 2.0, 0.0));
        limiter.acquire(RateLimitBucket::Read, "a").unwrap();
        limiter.acquire(RateLimitBucket::Read, "b").unwrap();

        // Capacity shrinks below the live reservation count.
        limiter.configure(&config(1.0, 1.0, 0.0));

        assert!(limiter.acquire(RateLimitBucket::Read, "c").is_err());
    }

    #[rstest]
    fn test_zero_capacity_always_drops() {
        let limiter = SharedRateLimiter::new(&config(0.0, 1.0, 10.0));
        assert!(limiter.acquire(RateLimitBucket::Read, "r").is_err());
    }

    #[rstest]
    fn test_process_shared_instance_is_reused() {
        let first = shared_rate_limiter(&config(1.0, 1.0, 1.0));
        let second = shared_rate_limiter(&config(20.0, 10.0, 1.0));
        assert!(Arc::ptr_eq(&first, &second));
    }
}
