//! Hacker sandbox: synthetic traffic generator and packet inspector
//!
//! Records are captured newest first. One record at a time is selected for
//! inspection; the selection owns the editable payload buffer and the
//! brute-force decrypt job. Each record owns at most one pending delivery
//! timer.

use chrono::Local;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::bridge::TamperRelay;
use crate::codec;
use crate::config::ConfigContext;
use crate::console::ConsoleLog;
use crate::error::{Result, SimError};
use crate::ledger::ActivityLedger;
use crate::models::{
    generate_id, ActivityLogEntry, LogStatus, NewActivity, Protocol, RecordOrigin, RecordStatus,
    TrafficKind, TrafficRecord,
};
use crate::timer::TimerSlot;

pub const GATEWAY_HOST: &str = "msg.gateway.local";
pub const P2P_ENDPOINT: &str = "/v1/send_msg";
pub const API_ENDPOINT: &str = "/v2/auth/verify";
pub const P2P_PAYLOAD: &str = "Hey buddy, let's meet at 5 PM.";
pub const P2P_FROM: &str = "8200250915";
pub const P2P_TO: &str = "9723405732";

/// Observable sandbox state
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxView {
    pub records: Vec<TrafficRecord>,
    pub selected: Option<String>,
    pub editing: String,
    pub decrypted: Option<String>,
    pub decrypting: bool,
    /// Brute-force progress, 0 to 100
    pub progress: f64,
}

#[derive(Default)]
struct SandboxState {
    records: Vec<TrafficRecord>,
    selected: Option<String>,
    editing: String,
    decrypted: Option<String>,
    decrypting: bool,
    progress: f64,
    ticker: TimerSlot,
    /// Bumped on every selection change so a running ticker can tell it is stale
    epoch: u64,
    deliveries: HashMap<String, TimerSlot>,
}

impl SandboxState {
    fn find(&self, id: &str) -> Option<&TrafficRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut TrafficRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    fn reset_inspection(&mut self) {
        self.ticker.cancel();
        self.epoch += 1;
        self.decrypted = None;
        self.decrypting = false;
        self.progress = 0.0;
    }
}

/// Sandbox handle. Clones share the same traffic history.
#[derive(Clone)]
pub struct Sandbox {
    state: Arc<Mutex<SandboxState>>,
    config: ConfigContext,
    ledger: ActivityLedger,
    console: ConsoleLog,
    relay: Option<TamperRelay>,
}

impl Sandbox {
    pub fn new(config: ConfigContext, ledger: ActivityLedger, console: ConsoleLog) -> Self {
        Self {
            state: Arc::new(Mutex::new(SandboxState::default())),
            config,
            ledger,
            console,
            relay: None,
        }
    }

    /// Pushes tampered peer payloads back to the shared store on forward
    pub fn with_relay(mut self, relay: TamperRelay) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Captures a new synthetic request and selects it
    pub fn generate(&self, kind: TrafficKind) -> Result<TrafficRecord> {
        let toggles = self.config.toggles();
        let id = generate_id("PKT");

        let mut headers = HashMap::from([
            ("Host".to_string(), GATEWAY_HOST.to_string()),
            ("X-Session".to_string(), format!("SESS-{id}")),
        ]);
        let (endpoint, body) = match kind {
            TrafficKind::P2p => {
                headers.insert("X-From".to_string(), P2P_FROM.to_string());
                headers.insert("X-To".to_string(), P2P_TO.to_string());
                (P2P_ENDPOINT, P2P_PAYLOAD.to_string())
            }
            TrafficKind::Api => (
                API_ENDPOINT,
                serde_json::json!({ "token": format!("AUTH_{id}") }).to_string(),
            ),
        };

        let protocol = Protocol::from_transport_security(toggles.transport_security);
        let record = TrafficRecord {
            id: id.clone(),
            timestamp: Local::now(),
            method: "POST".to_string(),
            endpoint: endpoint.to_string(),
            port: protocol.port(),
            protocol,
            headers,
            ciphertext: toggles.transport_security.then(|| codec::encode(&body)),
            body: body.clone(),
            status: RecordStatus::Captured,
            origin: RecordOrigin::Sandbox,
        };

        {
            let mut state = self.lock();
            state.records.insert(0, record.clone());
            state.reset_inspection();
            state.selected = Some(id.clone());
            state.editing = body.clone();
        }
        debug!("Generated {:?} record {} over {}", kind, id, protocol);

        if toggles.interception {
            self.console.push(format!(
                "INTERCEPT: Request {} from {} trapped.",
                id,
                record.header("X-From").unwrap_or("System")
            ));
            self.ledger.upsert(NewActivity {
                id: id.clone(),
                source: record.header("X-From").unwrap_or("LocalSystem").to_string(),
                destination: record.header("X-To").unwrap_or("RemoteAPI").to_string(),
                incoming_payload: record.wire_payload().to_string(),
                tampered_message: body,
                decryption_key: codec::key_marker(toggles.transport_security).to_string(),
                outgoing_payload: None,
                status: LogStatus::Intercepted,
                is_encrypted: record.ciphertext.is_some(),
            });
        } else {
            self.deliver(&id, None)?;
        }

        Ok(record)
    }

    /// Selects a record for inspection, discarding any decrypt progress
    pub fn select(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        let body = state
            .find(id)
            .map(|r| r.body.clone())
            .ok_or_else(|| SimError::RecordNotFound(id.to_string()))?;
        state.reset_inspection();
        state.selected = Some(id.to_string());
        state.editing = body;
        Ok(())
    }

    pub fn clear_selection(&self) {
        let mut state = self.lock();
        state.reset_inspection();
        state.selected = None;
        state.editing.clear();
    }

    /// Replaces the editable payload of the selected record
    pub fn set_editing(&self, text: &str) -> Result<()> {
        let mut state = self.lock();
        if state.selected.is_none() {
            return Err(SimError::InvalidState("no record selected".to_string()));
        }
        state.editing = text.to_string();
        Ok(())
    }

    /// Starts the simulated brute-force of the selected record's ciphertext.
    ///
    /// Progress advances linearly each tick; at 100% the ticker stops, the
    /// plaintext is recovered and copied into the edit buffer. Calling again
    /// once a result exists (or while running) does nothing.
    pub fn decrypt(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        if state.selected.as_deref() != Some(id) {
            return Err(SimError::NotSelected(id.to_string()));
        }
        let cipher = state
            .find(id)
            .ok_or_else(|| SimError::RecordNotFound(id.to_string()))?
            .ciphertext
            .clone()
            .ok_or_else(|| SimError::NoCiphertext(id.to_string()))?;
        if state.decrypted.is_some() || state.decrypting {
            return Ok(());
        }

        state.decrypting = true;
        state.progress = 0.0;

        let timing = self.config.timing();
        let steps = timing.brute_force_steps();
        let tick = timing.brute_force_tick();
        let epoch = state.epoch;
        let sandbox = self.clone();
        let record_id = id.to_string();

        state.ticker.spawn(async move {
            let start = tokio::time::Instant::now() + tick;
            let mut interval = tokio::time::interval_at(start, tick);
            for step in 1..=steps {
                interval.tick().await;
                if !sandbox.advance_decrypt(epoch, step, steps, &record_id, &cipher) {
                    break;
                }
            }
        });
        Ok(())
    }

    /// Returns false when the ticker must stop
    fn advance_decrypt(&self, epoch: u64, step: u32, steps: u32, id: &str, cipher: &str) -> bool {
        let mut state = self.lock();
        if state.epoch != epoch {
            return false;
        }
        state.progress = f64::from(step) / f64::from(steps) * 100.0;
        if step < steps {
            return true;
        }

        let recovered = codec::decode(cipher);
        state.decrypting = false;
        state.ticker.release();
        state.decrypted = Some(recovered.clone());
        state.editing = recovered;
        drop(state);

        self.console.push(format!("DECRYPT: Packet {id} recovered."));
        false
    }

    /// Logs the tamper, relays it, and delivers the edit buffer onward
    pub fn forward_modified(&self, id: &str) -> Result<ActivityLogEntry> {
        let mut state = self.lock();
        if state.selected.as_deref() != Some(id) {
            return Err(SimError::NotSelected(id.to_string()));
        }
        let record = state
            .find(id)
            .cloned()
            .ok_or_else(|| SimError::RecordNotFound(id.to_string()))?;
        if record.status != RecordStatus::Captured {
            return Err(SimError::InvalidState(format!(
                "record {} is {}, only CAPTURED records can be forwarded",
                id, record.status
            )));
        }

        let tls = self.config.toggles().transport_security;
        let tampered = state.editing.clone();
        let outgoing = if tls {
            codec::encode(&tampered)
        } else {
            tampered.clone()
        };

        let entry = self.ledger.upsert(NewActivity {
            id: id.to_string(),
            source: record.header("X-From").unwrap_or("Aura-User").to_string(),
            destination: record.header("X-To").unwrap_or("Aura-Target").to_string(),
            incoming_payload: record.wire_payload().to_string(),
            tampered_message: tampered.clone(),
            decryption_key: codec::key_marker(tls).to_string(),
            outgoing_payload: Some(outgoing.clone()),
            status: LogStatus::Modified,
            is_encrypted: tls,
        });

        if let Some(relay) = &self.relay {
            relay.relay(&record, &tampered);
        }

        state.reset_inspection();
        state.selected = None;
        state.editing.clear();
        drop(state);

        self.deliver(id, Some(outgoing))?;
        self.console
            .push("SUCCESS: Intelligence log updated and packet forwarded.");
        Ok(entry)
    }

    /// Completes delivery of a captured record after the deliver delay,
    /// overwriting its body with `payload` when given
    pub fn deliver(&self, id: &str, payload: Option<String>) -> Result<()> {
        let mut state = self.lock();
        let record = state
            .find(id)
            .ok_or_else(|| SimError::RecordNotFound(id.to_string()))?;
        if record.status != RecordStatus::Captured {
            return Err(SimError::InvalidState(format!(
                "record {id} was already delivered"
            )));
        }
        let to = record.header("X-To").map(str::to_string);

        self.console.push(format!(
            "ROUTING: Request {} forwarded to {}.",
            id,
            to.as_deref().unwrap_or("Endpoint")
        ));

        let sandbox = self.clone();
        let record_id = id.to_string();
        let delay = self.config.timing().deliver();
        state
            .deliveries
            .entry(id.to_string())
            .or_default()
            .arm(delay, async move {
                sandbox.complete_delivery(&record_id, payload);
            });
        Ok(())
    }

    fn complete_delivery(&self, id: &str, payload: Option<String>) {
        let mut state = self.lock();
        if let Some(mut slot) = state.deliveries.remove(id) {
            slot.release();
        }
        let modified = payload.is_some();
        let Some(record) = state.find_mut(id) else {
            return;
        };
        record.status = RecordStatus::Completed;
        if let Some(body) = payload {
            record.body = body;
        }
        let to = record.header("X-To").unwrap_or("Service").to_string();
        drop(state);

        info!("Record {} completed", id);
        self.console.push(format!(
            "SERVER: Delivered to {}.{}",
            to,
            if modified { " [MODIFIED]" } else { "" }
        ));
    }

    /// Adds an externally captured record unless its id is already known
    pub(crate) fn ingest(&self, record: TrafficRecord) -> bool {
        let mut state = self.lock();
        if state.find(&record.id).is_some() {
            return false;
        }
        state.records.insert(0, record);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().find(id).is_some()
    }

    pub fn record(&self, id: &str) -> Option<TrafficRecord> {
        self.lock().find(id).cloned()
    }

    /// All records, newest first
    pub fn records(&self) -> Vec<TrafficRecord> {
        self.lock().records.clone()
    }

    pub fn selected(&self) -> Option<String> {
        self.lock().selected.clone()
    }

    pub fn editing(&self) -> String {
        self.lock().editing.clone()
    }

    pub fn decrypted(&self) -> Option<String> {
        self.lock().decrypted.clone()
    }

    pub fn progress(&self) -> f64 {
        self.lock().progress
    }

    pub fn view(&self) -> SandboxView {
        let state = self.lock();
        SandboxView {
            records: state.records.clone(),
            selected: state.selected.clone(),
            editing: state.editing.clone(),
            decrypted: state.decrypted.clone(),
            decrypting: state.decrypting,
            progress: state.progress,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
