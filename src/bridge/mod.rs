//! Interception bridge
//!
//! Turns externally captured traffic into sandbox records:
//!
//! - peer chat packets from the shared document store (and `new_data`
//!   relays from the capture endpoint)
//! - request metadata reported by the forward proxy
//!
//! Inbound payloads are untrusted. They are normalized once at this
//! boundary and deduplicated by id, so at-least-once delivery from the feeds
//! produces exactly one record.

pub mod relay;

pub use relay::{TamperRelay, TAMPERED_STATUS};

use chrono::{DateTime, Local, TimeZone};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::ConfigContext;
use crate::console::ConsoleLog;
use crate::models::{
    generate_id, Protocol, ProxyCapture, RecordOrigin, RecordStatus, TrafficRecord,
};
use crate::realtime::RealtimeEvent;
use crate::sandbox::Sandbox;
use crate::store::ChildAdded;

pub const PEER_ENDPOINT: &str = "/aura/api/v3/transmit";
pub const UNKNOWN: &str = "UNKNOWN";

/// Canonical shape of a peer chat packet
#[derive(Debug, Clone, PartialEq)]
pub struct PeerMessage {
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub timestamp: DateTime<Local>,
}

fn text_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

/// Coerces a raw feed value into a [`PeerMessage`].
///
/// Returns `None` for anything that is not a JSON object. A missing, empty
/// or non-string id falls back to `store_key` (the key the document lives
/// under), then to a fresh id. Missing parties become `UNKNOWN` and missing
/// content becomes empty.
pub fn normalize(value: &Value, store_key: Option<&str>) -> Option<PeerMessage> {
    let obj = value.as_object()?;

    let id = match obj.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => store_key
            .filter(|k| !k.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| generate_id("PKT")),
    };
    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_i64)
        .and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Local::now);

    Some(PeerMessage {
        id,
        content: text_field(obj, "content").unwrap_or_default(),
        sender_id: text_field(obj, "senderId").unwrap_or_else(|| UNKNOWN.to_string()),
        receiver_id: text_field(obj, "receiverId").unwrap_or_else(|| UNKNOWN.to_string()),
        timestamp,
    })
}

/// Relays external captures into the sandbox
#[derive(Clone)]
pub struct InterceptionBridge {
    sandbox: Sandbox,
    config: ConfigContext,
    console: ConsoleLog,
}

impl InterceptionBridge {
    pub fn new(sandbox: Sandbox, config: ConfigContext, console: ConsoleLog) -> Self {
        Self {
            sandbox,
            config,
            console,
        }
    }

    /// Ingests one raw peer document. Returns the new record, or `None` if
    /// the value was malformed or already seen.
    pub fn ingest_peer(&self, value: &Value) -> Option<TrafficRecord> {
        self.ingest_keyed(value, None)
    }

    /// Ingests a document from the store feed, keyed like the stored copy
    /// so a later tamper relay updates that document
    pub fn ingest_added(&self, added: &ChildAdded) -> Option<TrafficRecord> {
        self.ingest_keyed(&added.doc, Some(&added.key))
    }

    fn ingest_keyed(&self, value: &Value, store_key: Option<&str>) -> Option<TrafficRecord> {
        let Some(msg) = normalize(value, store_key) else {
            debug!("Dropping malformed peer message");
            return None;
        };

        let tls = self.config.toggles().transport_security;
        let protocol = Protocol::from_transport_security(tls);
        let record = TrafficRecord {
            id: msg.id.clone(),
            timestamp: msg.timestamp,
            method: "POST".to_string(),
            endpoint: PEER_ENDPOINT.to_string(),
            port: protocol.port(),
            protocol,
            headers: HashMap::from([
                ("X-From".to_string(), msg.sender_id),
                ("X-To".to_string(), msg.receiver_id),
            ]),
            ciphertext: tls.then(|| codec::encode(&msg.content)),
            body: msg.content,
            status: RecordStatus::Captured,
            origin: RecordOrigin::Peer,
        };

        if !self.sandbox.ingest(record.clone()) {
            debug!("Duplicate peer packet {} ignored", record.id);
            return None;
        }

        let short: String = record.id.chars().take(8).collect();
        self.console
            .push(format!("CLOUD INTERCEPT: Packet {short} trapped."));
        Some(record)
    }

    /// Ingests request metadata from the forward proxy (no body)
    pub fn ingest_capture(&self, capture: &ProxyCapture) -> Option<TrafficRecord> {
        let endpoint = url::Url::parse(&capture.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| capture.url.clone());
        let tls = self.config.toggles().transport_security;
        let protocol = Protocol::from_transport_security(tls);

        let record = TrafficRecord {
            id: capture.id.clone(),
            timestamp: Local::now(),
            method: capture.method.to_ascii_uppercase(),
            endpoint,
            port: protocol.port(),
            protocol,
            headers: capture.headers.clone(),
            body: String::new(),
            // Nothing to encrypt: the proxy reports metadata only
            ciphertext: None,
            status: RecordStatus::Captured,
            origin: RecordOrigin::Proxy,
        };

        if !self.sandbox.ingest(record.clone()) {
            debug!("Duplicate proxy capture {} ignored", record.id);
            return None;
        }

        self.console.push(format!(
            "PROXY INTERCEPT: {} {} ({}) trapped.",
            record.method, capture.url, record.id
        ));
        Some(record)
    }

    pub fn handle_event(&self, event: &RealtimeEvent) -> Option<TrafficRecord> {
        match event {
            RealtimeEvent::NewData(value) => self.ingest_peer(value),
            RealtimeEvent::RequestIntercepted(capture) => self.ingest_capture(capture),
        }
    }

    /// Follows the store's child-added feed and the realtime channel until
    /// both are closed.
    pub async fn run(
        self,
        mut feed: broadcast::Receiver<ChildAdded>,
        mut events: broadcast::Receiver<RealtimeEvent>,
    ) {
        info!("Interception bridge running");
        let mut feed_open = true;
        let mut events_open = true;

        while feed_open || events_open {
            tokio::select! {
                added = feed.recv(), if feed_open => match added {
                    Ok(added) => {
                        self.ingest_added(&added);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Peer feed lagged, {} packet(s) skipped", skipped);
                    }
                    Err(RecvError::Closed) => feed_open = false,
                },
                event = events.recv(), if events_open => match event {
                    Ok(event) => {
                        self.handle_event(&event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Realtime channel lagged, {} event(s) skipped", skipped);
                    }
                    Err(RecvError::Closed) => events_open = false,
                },
            }
        }
        info!("Interception bridge stopped");
    }
}
