//! Shared document store mirroring packets between independent observers
//!
//! Peers append documents under `global_packets/<id>`; this system follows
//! the child-added feed and writes partial updates back when a peer packet
//! is tampered with.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Result, SimError};
use crate::models::generate_id;

/// Partial update written back for a tampered peer packet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacketPatch {
    pub content: String,
    pub status: String,
}

/// Write path of the shared store
#[async_trait]
pub trait PacketStore: Send + Sync {
    /// Merges `patch` into the document at `global_packets/<id>`
    async fn update(&self, id: &str, patch: PacketPatch) -> Result<()>;
}

/// One child-added notification: the key the document lives under and
/// the document as pushed
#[derive(Debug, Clone, PartialEq)]
pub struct ChildAdded {
    pub key: String,
    pub doc: Value,
}

/// In-process implementation of the shared store
#[derive(Debug, Clone)]
pub struct MemoryPacketStore {
    docs: Arc<Mutex<HashMap<String, Value>>>,
    added: broadcast::Sender<ChildAdded>,
}

impl MemoryPacketStore {
    pub fn new(capacity: usize) -> Self {
        let (added, _) = broadcast::channel(capacity.max(1));
        Self {
            docs: Arc::new(Mutex::new(HashMap::new())),
            added,
        }
    }

    /// Appends a peer document and notifies child-added subscribers.
    /// Returns the key it was stored under: the document's own non-empty
    /// string `id`, or a generated one.
    pub fn push(&self, doc: Value) -> String {
        let key = doc
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| generate_id("PKT"));
        {
            let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
            docs.insert(key.clone(), doc.clone());
        }
        // No subscribers is fine: the document is still stored.
        let _ = self.added.send(ChildAdded {
            key: key.clone(),
            doc,
        });
        debug!("global_packets/{} added", key);
        key
    }

    /// Child-added feed
    pub fn subscribe(&self) -> broadcast::Receiver<ChildAdded> {
        self.added.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        docs.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryPacketStore {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl PacketStore for MemoryPacketStore {
    async fn update(&self, id: &str, patch: PacketPatch) -> Result<()> {
        let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        let Some(doc) = docs.get_mut(id) else {
            return Err(SimError::RelayFailed(format!(
                "global_packets/{id} does not exist"
            )));
        };
        if let Value::Object(map) = doc {
            map.insert("content".to_string(), Value::String(patch.content));
            map.insert("status".to_string(), Value::String(patch.status));
        } else {
            *doc = serde_json::json!({
                "id": id,
                "content": patch.content,
                "status": patch.status,
            });
        }
        debug!("global_packets/{} updated", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryPacketStore::default();
        store.push(json!({ "id": "p1", "content": "hi", "senderId": "a" }));

        let patch = PacketPatch {
            content: "bye".to_string(),
            status: "hacked".to_string(),
        };
        store.update("p1", patch).await.unwrap();

        let doc = store.get("p1").unwrap();
        assert_eq!(doc["content"], "bye");
        assert_eq!(doc["status"], "hacked");
        assert_eq!(doc["senderId"], "a");
    }

    #[tokio::test]
    async fn test_push_notifies_subscribers() {
        let store = MemoryPacketStore::default();
        let mut feed = store.subscribe();
        let key = store.push(json!({ "content": "no id" }));
        assert!(key.starts_with("PKT-"));
        let added = feed.recv().await.unwrap();
        assert_eq!(added.key, key);
        assert_eq!(added.doc["content"], "no id");
    }

    #[tokio::test]
    async fn test_update_of_unknown_document_fails() {
        let store = MemoryPacketStore::default();
        let patch = PacketPatch {
            content: "bye".to_string(),
            status: "hacked".to_string(),
        };
        assert!(matches!(
            store.update("ghost", patch).await,
            Err(SimError::RelayFailed(_))
        ));
        assert!(store.is_empty());
    }
}
