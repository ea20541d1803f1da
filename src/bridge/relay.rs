//! Outbound tamper relay back to the shared document store

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::console::ConsoleLog;
use crate::models::{RecordOrigin, TrafficRecord};
use crate::store::{PacketPatch, PacketStore};

/// Status written to the peer document once its content was tampered with
pub const TAMPERED_STATUS: &str = "hacked";

/// Fire-and-forget writer of tampered peer content.
///
/// There is no acknowledgment and no retry. A failed write is logged to the
/// console and tracing only; the ledger is left untouched.
#[derive(Clone)]
pub struct TamperRelay {
    store: Arc<dyn PacketStore>,
    console: ConsoleLog,
}

impl TamperRelay {
    pub fn new(store: Arc<dyn PacketStore>, console: ConsoleLog) -> Self {
        Self { store, console }
    }

    /// Pushes `content` for peer records. Other origins have no external
    /// document and are skipped (`None`).
    pub fn relay(&self, record: &TrafficRecord, content: &str) -> Option<JoinHandle<()>> {
        if record.origin != RecordOrigin::Peer {
            return None;
        }

        let store = Arc::clone(&self.store);
        let console = self.console.clone();
        let id = record.id.clone();
        let patch = PacketPatch {
            content: content.to_string(),
            status: TAMPERED_STATUS.to_string(),
        };

        Some(tokio::spawn(async move {
            match store.update(&id, patch).await {
                Ok(()) => debug!("Relayed tampered content for {}", id),
                Err(e) => {
                    warn!("Relay of {} failed: {}", id, e);
                    console.push(format!("RELAY FAILED: Packet {id} not updated ({e})."));
                }
            }
        }))
    }
}
