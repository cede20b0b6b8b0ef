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

//! WebSocket fan-out for streaming normalized events to UI subscribers.
//!
//! Each client carries a subscription set, a bounded FIFO queue, and
//! liveness timestamps. Backpressure preserves criticality: a critical event
//! may evict one queued non-critical event; non-critical overflow is
//! dropped and counted. Per-client FIFO order holds except across those
//! evictions.

use std::{
    collections::{HashSet, VecDeque},
    fmt::Debug,
    str::FromStr,
    sync::Arc,
};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

use sidecar_kalshi::common::parse::{format_iso_millis, normalize_timestamp};

use crate::config::FanoutConfig;

/// Close code for a server-side eviction of an unresponsive client.
pub const CLOSE_CODE_STALE: u16 = 1001;
/// Close code for an ordinary disconnect.
pub const CLOSE_CODE_NORMAL: u16 = 1000;

/// Failures raised by the fan-out manager.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FanoutError {
    #[error("unknown websocket client: {0}")]
    UnknownClient(String),
    #[error("unsupported websocket topics: {0:?}")]
    UnsupportedTopics(Vec<String>),
    #[error("unable to determine websocket event topic")]
    UnknownTopic,
    #[error("invalid event timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("websocket send failed: {0}")]
    Send(String),
}

/// Topics streamable to UI subscribers.
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
pub enum UiTopic {
    Market,
    Order,
    Position,
    RiskAlert,
}

impl UiTopic {
    /// All supported topics (the default subscription set).
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [Self::Market, Self::Order, Self::Position, Self::RiskAlert]
    }
}

/// Framework adapter contract for websocket clients.
pub trait UiClient: Send + Sync + Debug {
    /// Sends a JSON frame to the connected client.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport write fails.
    fn send_json(&self, frame: &Value) -> anyhow::Result<()>;

    /// Sends a websocket ping frame.
    fn send_ping(&self);

    /// Closes the websocket connection.
    fn close(&self, code: u16, reason: &str);
}

/// Normalized event contract streamed to UI subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct UiEvent {
    pub topic: UiTopic,
    pub payload: Value,
    pub timestamp: String,
    pub critical: bool,
}

impl UiEvent {
    /// Builds a [`UiEvent`] from a raw normalized event mapping.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::UnknownTopic`] when no topic can be derived and
    /// [`FanoutError::InvalidTimestamp`] for unparsable timestamps.
    pub fn from_value(raw: &Value) -> Result<Self, FanoutError> {
        let topic = derive_topic(raw)?;
        let payload = match raw.get("payload") {
            Some(payload) if payload.is_object() => payload.clone(),
            _ => raw.clone(),
        };
        let timestamp = derive_timestamp(raw, &payload)?;
        let critical = topic == UiTopic::RiskAlert
            && (truthy(raw.get("critical")) || truthy(payload.get("critical")));
        Ok(Self {
            topic,
            payload,
            timestamp,
            critical,
        })
    }

    /// Serializes the outbound frame.
    #[must_use]
    pub fn to_frame(&self) -> Value {
        json!({
            "type": "event",
            "topic": self.topic,
            "timestamp": self.timestamp,
            "critical": self.critical,
            "payload": self.payload,
        })
    }
}

fn derive_topic(raw: &Value) -> Result<UiTopic, FanoutError> {
    for key in ["topic", "category", "stream"] {
        if let Some(explicit) = raw.get(key).and_then(Value::as_str) {
            if let Ok(topic) = UiTopic::from_str(explicit.trim()) {
                return Ok(topic);
            }
        }
    }

    let schema = raw
        .get("schema")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    match schema.as_str() {
        "orderbook_delta" | "trade" | "market" => Ok(UiTopic::Market),
        "order" | "order_update" | "orders" => Ok(UiTopic::Order),
        "position" | "positions" => Ok(UiTopic::Position),
        "risk_alert" | "risk" => Ok(UiTopic::RiskAlert),
        _ => Err(FanoutError::UnknownTopic),
    }
}

fn derive_timestamp(raw: &Value, payload: &Value) -> Result<String, FanoutError> {
    let candidate = raw
        .get("timestamp")
        .or_else(|| raw.get("updated_at"))
        .or_else(|| payload.get("timestamp"));
    match candidate {
        None => Ok(format_iso_millis(Utc::now())),
        Some(value) => normalize_timestamp(Some(value))
            .map_err(|error| FanoutError::InvalidTimestamp(error.message)),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    value.is_some_and(|v| v.as_bool() == Some(true))
}

#[derive(Debug)]
struct ClientState {
    client: Arc<dyn UiClient>,
    subscriptions: HashSet<UiTopic>,
    queue: VecDeque<UiEvent>,
    dropped_non_critical: u64,
    connected_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    last_ping_at: DateTime<Utc>,
}

/// Manages websocket clients with subscriptions, fan-out, and liveness controls.
#[derive(Debug)]
pub struct UiConnectionManager {
    max_queue_size: usize,
    heartbeat_interval: TimeDelta,
    stale_timeout: TimeDelta,
    clients: DashMap<String, ClientState>,
}

impl UiConnectionManager {
    /// Creates a new [`UiConnectionManager`] instance.
    ///
    /// # Panics
    ///
    /// Panics when the configured intervals are not representable; the
    /// defaults always are.
    #[must_use]
    pub fn new(config: &FanoutConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            heartbeat_interval: TimeDelta::from_std(std::time::Duration::from_secs_f64(
                config.heartbeat_interval_seconds,
            ))
            .expect("heartbeat interval out of range"),
            stale_timeout: TimeDelta::from_std(std::time::Duration::from_secs_f64(
                config.stale_timeout_seconds,
            ))
            .expect("stale timeout out of range"),
            clients: DashMap::new(),
        }
    }

    /// Registers a client; `subscriptions = None` subscribes all topics.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::UnsupportedTopics`] for invalid topics.
    pub fn connect(
        &self,
        client_id: &str,
        client: Arc<dyn UiClient>,
        subscriptions: Option<&[String]>,
    ) -> Result<(), FanoutError> {
        let subscriptions = match subscriptions {
            None => UiTopic::all().into_iter().collect(),
            Some(requested) => sanitize_topics(requested)?,
        };
        let now = Utc::now();
        self.clients.insert(
            client_id.to_string(),
            ClientState {
                client,
                subscriptions,
                queue: VecDeque::new(),
                dropped_non_critical: 0,
                connected_at: now,
                last_seen_at: now,
                last_ping_at: now,
            },
        );
        Ok(())
    }

    /// Removes a client and closes its connection.
    pub fn disconnect(&self, client_id: &str, code: u16, reason: &str) {
        if let Some((_, state)) = self.clients.remove(client_id) {
            state.client.close(code, reason);
        }
    }

    /// Adds topics to a client's subscription set.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::UnknownClient`] or
    /// [`FanoutError::UnsupportedTopics`].
    pub fn subscribe(
        &self,
        client_id: &str,
        topics: &[String],
    ) -> Result<HashSet<UiTopic>, FanoutError> {
        let requested = sanitize_topics(topics)?;
        let mut state = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| FanoutError::UnknownClient(client_id.to_string()))?;
        state.subscriptions.extend(requested);
        state.last_seen_at = Utc::now();
        Ok(state.subscriptions.clone())
    }

    /// Removes topics from a client's subscription set.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::UnknownClient`] or
    /// [`FanoutError::UnsupportedTopics`].
    pub fn unsubscribe(
        &self,
        client_id: &str,
        topics: &[String],
    ) -> Result<HashSet<UiTopic>, FanoutError> {
        let requested = sanitize_topics(topics)?;
        let mut state = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| FanoutError::UnknownClient(client_id.to_string()))?;
        state.subscriptions.retain(|topic| !requested.contains(topic));
        state.last_seen_at = Utc::now();
        Ok(state.subscriptions.clone())
    }

    /// Refreshes a client's liveness timestamp.
    pub fn mark_client_alive(&self, client_id: &str, at: Option<DateTime<Utc>>) {
        if let Some(mut state) = self.clients.get_mut(client_id) {
            state.last_seen_at = at.unwrap_or_else(Utc::now);
        }
    }

    /// Converts a raw event and enqueues it for every subscribed client.
    ///
    /// # Errors
    ///
    /// Returns a [`FanoutError`] when the event cannot be converted.
    pub fn stream_event(&self, raw: &Value) -> Result<(), FanoutError> {
        let event = UiEvent::from_value(raw)?;
        for mut entry in self.clients.iter_mut() {
            if !entry.subscriptions.contains(&event.topic) {
                continue;
            }
            enqueue_event(entry.value_mut(), event.clone(), self.max_queue_size);
        }
        Ok(())
    }

    /// Sends up to `max_messages` queued frames (default: the whole queue).
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::UnknownClient`] or [`FanoutError::Send`].
    pub fn flush(&self, client_id: &str, max_messages: Option<usize>) -> Result<usize, FanoutError> {
        let mut state = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| FanoutError::UnknownClient(client_id.to_string()))?;

        let limit = max_messages.unwrap_or(state.queue.len());
        let mut sent = 0;
        while sent < limit {
            let Some(event) = state.queue.pop_front() else {
                break;
            };
            state
                .client
                .send_json(&event.to_frame())
                .map_err(|error| FanoutError::Send(error.to_string()))?;
            sent += 1;
        }
        state.last_seen_at = Utc::now();
        Ok(sent)
    }

    /// Flushes every connected client, returning per-client send counts.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::Send`] on the first transport failure.
    pub fn flush_all(
        &self,
        max_messages_per_client: Option<usize>,
    ) -> Result<Vec<(String, usize)>, FanoutError> {
        let client_ids: Vec<String> =
            self.clients.iter().map(|entry| entry.key().clone()).collect();
        let mut sent_counts = Vec::with_capacity(client_ids.len());
        for client_id in client_ids {
            let sent = self.flush(&client_id, max_messages_per_client)?;
            sent_counts.push((client_id, sent));
        }
        Ok(sent_counts)
    }

    /// Pings every client whose last ping is at least one interval old;
    /// returns the pinged client ids.
    pub fn heartbeat(&self, at: Option<DateTime<Utc>>) -> Vec<String> {
        let now = at.unwrap_or_else(Utc::now);
        let mut pinged = Vec::new();
        for mut entry in self.clients.iter_mut() {
            if now - entry.last_ping_at >= self.heartbeat_interval {
                entry.client.send_ping();
                entry.last_ping_at = now;
                pinged.push(entry.key().clone());
            }
        }
        pinged
    }

    /// Closes and removes clients idle past the stale timeout; returns the
    /// evicted client ids.
    pub fn disconnect_stale_clients(&self, at: Option<DateTime<Utc>>) -> Vec<String> {
        let now = at.unwrap_or_else(Utc::now);
        let stale: Vec<String> = self
            .clients
            .iter()
            .filter(|entry| now - entry.last_seen_at > self.stale_timeout)
            .map(|entry| entry.key().clone())
            .collect();
        for client_id in &stale {
            self.disconnect(client_id, CLOSE_CODE_STALE, "stale_client");
        }
        stale
    }

    /// Operator view of one client's state.
    ///
    /// # Errors
    ///
    /// Returns [`FanoutError::UnknownClient`] for unregistered ids.
    pub fn client_stats(&self, client_id: &str) -> Result<Value, FanoutError> {
        let state = self
            .clients
            .get(client_id)
            .ok_or_else(|| FanoutError::UnknownClient(client_id.to_string()))?;
        let mut subscriptions: Vec<String> = state
            .subscriptions
            .iter()
            .map(ToString::to_string)
            .collect();
        subscriptions.sort();

        let mut stats = Map::new();
        stats.insert("subscriptions".to_string(), json!(subscriptions));
        stats.insert("queued".to_string(), json!(state.queue.len()));
        stats.insert(
            "dropped_non_critical".to_string(),
            json!(state.dropped_non_critical),
        );
        stats.insert(
            "connected_at".to_string(),
            json!(format_iso_millis(state.connected_at)),
        );
        stats.insert(
            "last_seen_at".to_string(),
            json!(format_iso_millis(state.last_seen_at)),
        );
        stats.insert(
            "last_ping_at".to_string(),
            json!(format_iso_millis(state.last_ping_at)),
        );
        Ok(Value::Object(stats))
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

fn sanitize_topics(topics: &[String]) -> Result<HashSet<UiTopic>, FanoutError> {
    let mut sanitized = HashSet::new();
    let mut invalid = Vec::new();
    for topic in topics {
        match UiTopic::from_str(topic.trim()) {
            Ok(parsed) => {
                sanitized.insert(parsed);
            }
            Err(_) => invalid.push(topic.to_lowercase()),
        }
    }
    if !invalid.is_empty() {
        invalid.sort();
        return Err(FanoutError::UnsupportedTopics(invalid));
    }
    Ok(sanitized)
}

/// Backpressure with criticality preservation.
fn enqueue_event(state: &mut ClientState, event: UiEvent, max_queue_size: usize) {
    if state.queue.len() < max_queue_size {
        state.queue.push_back(event);
        return;
    }

    if event.critical {
        if let Some(index) = state.queue.iter().position(|queued| !queued.critical) {
            state.queue.remove(index);
            state.dropped_non_critical += 1;
            state.queue.push_back(event);
            return;
        }
        // All queued events are critical; the oldest yields.
        state.queue.pop_front();
        state.queue.push_back(event);
        return;
    }

    state.dropped_non_critical += 1;
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
