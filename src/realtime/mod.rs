//! Realtime broadcast channel
//!
//! Fans capture events out to every connected observer: in-process
//! subscribers through [`RealtimeHub::subscribe`] and remote observers
//! through the WebSocket endpoint in [`websocket`].

pub mod websocket;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::ProxyCapture;

/// Events carried on the realtime channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// Relay of a `POST /capture` body
    NewData(Value),
    /// Request metadata observed by the forward proxy
    RequestIntercepted(ProxyCapture),
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::NewData(_) => "new_data",
            RealtimeEvent::RequestIntercepted(_) => "request_intercepted",
        }
    }
}

/// Cloneable publisher/subscriber hub
#[derive(Debug, Clone)]
pub struct RealtimeHub {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes to all current subscribers, returning how many received it
    pub fn publish(&self, event: RealtimeEvent) -> usize {
        let name = event.name();
        let delivered = self.tx.send(event).unwrap_or(0);
        debug!("Broadcast {} to {} observer(s)", name, delivered);
        delivered
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = RealtimeEvent::NewData(json!({ "id": "x" }));
        let text = serde_json::to_string(&event).unwrap();
        assert_eq!(text, r#"{"event":"new_data","data":{"id":"x"}}"#);
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = RealtimeHub::default();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.publish(RealtimeEvent::NewData(json!({}))), 2);
        assert_eq!(a.recv().await.unwrap().name(), "new_data");
        assert_eq!(b.recv().await.unwrap().name(), "new_data");
    }

    #[test]
    fn test_publish_without_observers() {
        let hub = RealtimeHub::default();
        assert_eq!(hub.publish(RealtimeEvent::NewData(json!({}))), 0);
    }
}
