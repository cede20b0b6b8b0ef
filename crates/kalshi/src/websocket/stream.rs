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

//! Market-data stream state machine.
//!
//! A dedicated task walks the connect → subscribe → await-disconnect cycle
//! and emits control envelopes over a bounded channel; the driver answers
//! `AwaitDisconnect` and `Sleep` on the paired reply channel. Transient
//! disconnects never raise — the machine emits degraded health and keeps
//! reconnecting until the retry window expires or a session stabilizes.

use std::{str::FromStr, sync::Arc};

use rand::RngExt;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};

use crate::{
    common::{consts::KALSHI_WS_PATH, credential::Credential, enums::StreamChannel},
    config::StreamReconnectConfig,
    ratelimit::{RateLimitBucket, SharedRateLimiter},
    websocket::messages::{
        DisconnectClass, DriverReply, HealthReason, HealthState, SUBSCRIBE_HANDLER, StreamEnvelope,
    },
};

const ENVELOPE_CHANNEL_CAPACITY: usize = 32;

/// Driver-side handle to a running stream session.
///
/// Dropping the handle (or calling [`StreamHandle::close`]) cancels the
/// machine at its next suspension point; pending emissions are drained.
#[derive(Debug)]
pub struct StreamHandle {
    envelopes: mpsc::Receiver<StreamEnvelope>,
    replies: mpsc::Sender<DriverReply>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Receives the next control envelope, or `None` when the session ended.
    pub async fn next_envelope(&mut self) -> Option<StreamEnvelope> {
        self.envelopes.recv().await
    }

    /// Sends a driver reply; returns `false` when the session ended.
    pub async fn reply(&self, reply: DriverReply) -> bool {
        self.replies.send(reply).await.is_ok()
    }

    /// Terminates the session and waits for the machine task to finish.
    pub async fn close(mut self) {
        self.envelopes.close();
        drop(self.replies);
        let _ = self.task.await;
    }
}

/// Spawns the stream state machine for the requested channels.
///
/// Unsupported channels are dropped with a warning. The returned handle is
/// the only way to drive the session.
#[must_use]
pub fn spawn_stream(
    websocket_url: String,
    credential: Credential,
    limiter: Arc<SharedRateLimiter>,
    reconnect: StreamReconnectConfig,
    channels: &[String],
) -> StreamHandle {
    let mut supported = Vec::new();
    for channel in channels {
        match StreamChannel::from_str(channel) {
            Ok(parsed) => supported.push(parsed),
            Err(_) => tracing::warn!(%channel, "dropping unsupported market-data channel"),
        }
    }

    let (envelope_tx, envelope_rx) = mpsc::channel(ENVELOPE_CHANNEL_CAPACITY);
    let (reply_tx, reply_rx) = mpsc::channel(1);

    let machine = StreamMachine {
        websocket_url,
        credential,
        limiter,
        reconnect,
        channels: supported,
        envelopes: envelope_tx,
        replies: reply_rx,
    };
    let task = tokio::spawn(machine.run());

    StreamHandle {
        envelopes: envelope_rx,
        replies: reply_tx,
        task,
    }
}

struct StreamMachine {
    websocket_url: String,
    credential: Credential,
    limiter: Arc<SharedRateLimiter>,
    reconnect: StreamReconnectConfig,
    channels: Vec<StreamChannel>,
    envelopes: mpsc::Sender<StreamEnvelope>,
    replies: mpsc::Receiver<DriverReply>,
}

impl StreamMachine {
    async fn run(mut self) {
        let mut consecutive_failures: u32 = 0;
        let mut retry_window_started: Option<Instant> = None;
        let mut health = HealthState::Healthy;

        loop {
            if !self.connect_and_subscribe().await {
                return;
            }
            let connected_at = Instant::now();

            if !self.emit(StreamEnvelope::AwaitDisconnect).await {
                return;
            }
            let notice = match self.replies.recv().await {
                Some(DriverReply::Disconnected(notice)) => notice,
                Some(other) => {
                    tracing::warn!(?other, "unexpected driver reply while awaiting disconnect");
                    continue;
                }
                None => return,
            };

            match notice.classify() {
                DisconnectClass::Clean => {
                    tracing::debug!("market-data session closed cleanly");
                    return;
                }
                DisconnectClass::AuthFailure => {
                    self.emit(StreamEnvelope::HealthState {
                        state: HealthState::Degraded,
                        reason: HealthReason::AuthFailure,
                        attempt: consecutive_failures + 1,
                    })
                    .await;
                    return;
                }
                DisconnectClass::Transient => {}
            }

            let uptime = connected_at.elapsed().as_secs_f64();
            if self.reconnect.stable_connect_seconds > 0.0
                && uptime >= self.reconnect.stable_connect_seconds
            {
                consecutive_failures = 0;
                retry_window_started = None;
            } else {
                consecutive_failures += 1;
                retry_window_started.get_or_insert_with(Instant::now);
            }

            if let Some(window_started) = retry_window_started {
                if window_started.elapsed().as_secs_f64() > self.reconnect.max_retry_window_seconds
                {
                    self.emit(StreamEnvelope::HealthState {
                        state: HealthState::Degraded,
                        reason: HealthReason::MaxRetryWindowReached,
                        attempt: consecutive_failures,
                    })
                    .await;
                    return;
                }
            }

            if consecutive_failures >= self.reconnect.degraded_after_attempts
                && health != HealthState::Degraded
            {
                health = HealthState::Degraded;
                if !self
                    .emit(StreamEnvelope::HealthState {
                        state: HealthState::Degraded,
                        reason: HealthReason::RepeatedDisconnects,
                        attempt: consecutive_failures,
                    })
                    .await
                {
                    return;
                }
            }

            let backoff_seconds = self.next_backoff(consecutive_failures);
            if !self
                .emit(StreamEnvelope::ReconnectScheduled {
                    attempt: consecutive_failures,
                    backoff_seconds,
                    close_type: DisconnectClass::Transient,
                })
                .await
            {
                return;
            }
            if !self
                .emit(StreamEnvelope::Sleep {
                    seconds: backoff_seconds,
                })
                .await
            {
                return;
            }

            let stable_connect = match self.replies.recv().await {
                Some(DriverReply::Resumed { stable_connect }) => stable_connect,
                Some(other) => {
                    tracing::warn!(?other, "unexpected driver reply after backoff sleep");
                    false
                }
                None => return,
            };
            if stable_connect {
                consecutive_failures = 0;
                retry_window_started = None;
                if health == HealthState::Degraded {
                    health = HealthState::Healthy;
                    if !self
                        .emit(StreamEnvelope::HealthState {
                            state: HealthState::Healthy,
                            reason: HealthReason::StableConnectionRestored,
                            attempt: 0,
                        })
                        .await
                    {
                        return;
                    }
                }
            }
        }
    }

    async fn connect_and_subscribe(&mut self) -> bool {
        if let Err(error) = self
            .limiter
            .acquire_async(RateLimitBucket::Read, "ws:connect")
            .await
        {
            tracing::warn!(error = %error, "rate limiter rejected stream connect");
            return false;
        }
        let connect = StreamEnvelope::Connect {
            url: self.websocket_url.clone(),
            headers: self.credential.signed_headers("GET", KALSHI_WS_PATH, ""),
        };
        if !self.emit(connect).await {
            return false;
        }

        for channel in self.channels.clone() {
            let operation = format!("ws:subscribe:{channel}");
            if let Err(error) = self
                .limiter
                .acquire_async(RateLimitBucket::Write, &operation)
                .await
            {
                tracing::warn!(error = %error, %channel, "rate limiter rejected subscribe");
                return false;
            }
            let subscribe = StreamEnvelope::Subscribe {
                channel,
                url: self.websocket_url.clone(),
                headers: self.credential.signed_headers("GET", KALSHI_WS_PATH, ""),
                handler: SUBSCRIBE_HANDLER.to_string(),
                resubscribe: true,
            };
            if !self.emit(subscribe).await {
                return false;
            }
        }
        true
    }

    async fn emit(&self, envelope: StreamEnvelope) -> bool {
        self.envelopes.send(envelope).await.is_ok()
    }

    fn next_backoff(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(32);
        let base = (self.reconnect.base_backoff_seconds * 2f64.powi(exponent as i32))
            .min(self.reconnect.max_backoff_seconds);
        if self.reconnect.jitter_ratio > 0.0 {
            let ratio = self.reconnect.jitter_ratio;
            let jitter = rand::rng().random_range(-ratio..=ratio);
            (base * (1.0 + jitter)).max(0.0)
        } else {
            base
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RateLimitConfig,
        websocket::messages::DisconnectNotice,
    };

    fn test_reconnect() -> StreamReconnectConfig {
        StreamReconnectConfig {
            base_backoff_seconds: 0.5,
            max_backoff_seconds: 1.0,
            jitter_ratio: 0.0,
            max_retry_window_seconds: 10.0,
            stable_connect_seconds: 0.0,
            degraded_after_attempts: 1,
        }
    }

    fn spawn(reconnect: StreamReconnectConfig, channels: &[&str]) -> StreamHandle {
        let limiter = Arc::new(SharedRateLimiter::new(&RateLimitConfig {
            read_requests_per_second: 100.0,
            write_requests_per_second: 100.0,
            wait_timeout_seconds: 1.0,
        }));
        let channels: Vec<String> = channels.iter().map(ToString::to_string).collect();
        spawn_stream(
            "wss://example.test/ws".to_string(),
            Credential::new("k".to_string(), "s".to_string()),
            limiter,
            reconnect,
            &channels,
        )
    }

    #[tokio::test]
    async fn test_reconnect_orchestration_after_transient_disconnect() {
        let mut handle = spawn(test_reconnect(), &["orderbook_delta", "trade", "foo"]);

        let connect = handle.next_envelope().await.unwrap();
        assert!(matches!(connect, StreamEnvelope::Connect { .. }));

        // Unsupported channel "foo" was dropped; two subscribes follow.
        for expected in [StreamChannel::OrderbookDelta, StreamChannel::Trade] {
            match handle.next_envelope().await.unwrap() {
                StreamEnvelope::Subscribe {
                    channel,
                    resubscribe,
                    handler,
                    ..
                } => {
                    assert_eq!(channel, expected);
                    assert!(resubscribe);
                    assert_eq!(handler, SUBSCRIBE_HANDLER);
                }
                other => panic!("expected subscribe, got {other:?}"),
            }
        }

        assert_eq!(
            handle.next_envelope().await.unwrap(),
            StreamEnvelope::AwaitDisconnect
        );
        assert!(
            handle
                .reply(DriverReply::Disconnected(DisconnectNotice {
                    clean: Some(false),
                    status_code: None,
                    reason: Some("connection reset".to_string()),
                }))
                .await
        );

        assert_eq!(
            handle.next_envelope().await.unwrap(),
            StreamEnvelope::HealthState {
                state: HealthState::Degraded,
                reason: HealthReason::RepeatedDisconnects,
                attempt: 1,
            }
        );
        assert_eq!(
            handle.next_envelope().await.unwrap(),
            StreamEnvelope::ReconnectScheduled {
                attempt: 1,
                backoff_seconds: 0.5,
                close_type: DisconnectClass::Transient,
            }
        );
        assert_eq!(
            handle.next_envelope().await.unwrap(),
            StreamEnvelope::Sleep { seconds: 0.5 }
        );

        assert!(
            handle
                .reply(DriverReply::Resumed {
                    stable_connect: true
                })
                .await
        );
        assert_eq!(
            handle.next_envelope().await.unwrap(),
            StreamEnvelope::HealthState {
                state: HealthState::Healthy,
                reason: HealthReason::StableConnectionRestored,
                attempt: 0,
            }
        );

        // The machine loops back to a fresh connect.
        assert!(matches!(
            handle.next_envelope().await.unwrap(),
            StreamEnvelope::Connect { .. }
        ));
        handle.close().await;
    }

    #[tokio::test]
    async fn test_auth_failure_enters_degraded_and_terminates() {
        let mut handle = spawn(test_reconnect(), &["trade"]);

        assert!(matches!(
            handle.next_envelope().await.unwrap(),
            StreamEnvelope::Connect { .. }
        ));
        assert!(matches!(
            handle.next_envelope().await.unwrap(),
            StreamEnvelope::Subscribe { .. }
        ));
        assert_eq!(
            handle.next_envelope().await.unwrap(),
            StreamEnvelope::AwaitDisconnect
        );

        assert!(
            handle
                .reply(DriverReply::Disconnected(DisconnectNotice {
                    clean: None,
                    status_code: Some(401),
                    reason: Some("auth expired".to_string()),
                }))
                .await
        );

        assert_eq!(
            handle.next_envelope().await.unwrap(),
            StreamEnvelope::HealthState {
                state: HealthState::Degraded,
                reason: HealthReason::AuthFailure,
                attempt: 1,
            }
        );
        assert!(handle.next_envelope().await.is_none());
    }

    #[tokio::test]
    async fn test_clean_disconnect_terminates_without_health_noise() {
        let mut handle = spawn(test_reconnect(), &["trade"]);

        while let Some(envelope) = handle.next_envelope().await {
            if envelope == StreamEnvelope::AwaitDisconnect {
                break;
            }
        }
        assert!(
            handle
                .reply(DriverReply::Disconnected(DisconnectNotice {
                    clean: Some(true),
                    status_code: None,
                    reason: None,
                }))
                .await
        );
        assert!(handle.next_envelope().await.is_none());
    }

    #[tokio::test]
    async fn test_degraded_emitted_once_per_transition() {
        let mut handle = spawn(test_reconnect(), &["trade"]);

        let mut degraded_count = 0;
        for _ in 0..2 {
            while let Some(envelope) = handle.next_envelope().await {
                match envelope {
                    StreamEnvelope::AwaitDisconnect => break,
                    StreamEnvelope::HealthState {
                        state: HealthState::Degraded,
                        reason: HealthReason::RepeatedDisconnects,
                        ..
                    } => degraded_count += 1,
                    _ => {}
                }
            }
            assert!(
                handle
                    .reply(DriverReply::Disconnected(DisconnectNotice {
                        clean: Some(false),
                        status_code: None,
                        reason: Some("connection reset".to_string()),
                    }))
                    .await
            );
            // Drain the health/reconnect/sleep run for this failure.
            loop {
                match handle.next_envelope().await.unwrap() {
                    StreamEnvelope::HealthState {
                        state: HealthState::Degraded,
                        reason: HealthReason::RepeatedDisconnects,
                        ..
                    } => degraded_count += 1,
                    StreamEnvelope::Sleep { .. } => break,
                    _ => {}
                }
            }
            assert!(
                handle
                    .reply(DriverReply::Resumed {
                        stable_connect: false
                    })
                    .await
            );
        }

        assert_eq!(degraded_count, 1);
        handle.close().await;
    }

    #[tokio::test]
    async fn test_backoff_doubles_and_caps() {
        let mut handle = spawn(test_reconnect(), &["trade"]);

        let mut backoffs = Vec::new();
        for _ in 0..3 {
            while let Some(envelope) = handle.next_envelope().await {
                if envelope == StreamEnvelope::AwaitDisconnect {
                    break;
                }
            }
            assert!(
                handle
                    .reply(DriverReply::Disconnected(DisconnectNotice {
                        clean: Some(false),
                        ..Default::default()
                    }))
                    .await
            );
            loop {
                match handle.next_envelope().await.unwrap() {
                    StreamEnvelope::ReconnectScheduled {
                        backoff_seconds, ..
                    } => backoffs.push(backoff_seconds),
                    StreamEnvelope::Sleep { .. } => break,
                    _ => {}
                }
            }
            assert!(
                handle
                    .reply(DriverReply::Resumed {
                        stable_connect: false
                    })
                    .await
            );
        }

        // base 0.5 doubling, capped at max 1.0.
        assert_eq!(backoffs, vec![0.5, 1.0, 1.0]);
        handle.close().await;
    }
}
