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

//! Internal event bus primitives for connector fan-out.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    error::{ConnectorError, ConnectorErrorCode},
    interfaces::EventPublisher,
};

/// Bounded queue-backed publisher used by the engine runtime.
///
/// Publication is non-lossy: when the queue is full the publisher suspends,
/// applying backpressure to the normalizer path.
#[derive(Clone, Debug)]
pub struct InMemoryEventBus {
    tx: mpsc::Sender<Value>,
}

impl InMemoryEventBus {
    /// Creates a bus and hands back the consumer side of the queue.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: Value) -> Result<(), ConnectorError> {
        self.tx.send(event).await.map_err(|_| {
            ConnectorError::new(ConnectorErrorCode::Unknown, "event bus receiver dropped")
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_publish_preserves_fifo_order() {
        let (bus, mut rx) = InMemoryEventBus::new(4);

        bus.publish(json!({"i": 1})).await.unwrap();
        bus.publish(json!({"i": 2})).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), json!({"i": 1}));
        assert_eq!(rx.recv().await.unwrap(), json!({"i": 2}));
    }

    #[tokio::test]
    async fn test_publish_fails_when_consumer_is_gone() {
        let (bus, rx) = InMemoryEventBus::new(4);
        drop(rx);

        let error = bus.publish(json!({"i": 1})).await.unwrap_err();
        assert_eq!(error.code, ConnectorErrorCode::Unknown);
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let (bus, mut rx) = InMemoryEventBus::new(1);
        bus.publish(json!({"i": 1})).await.unwrap();

        let blocked = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(json!({"i": 2})).await })
        };
        // The producer is parked until the consumer drains a slot.
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        assert_eq!(rx.recv().await.unwrap(), json!({"i": 1}));
        blocked.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap(), json!({"i": 2}));
    }
}
