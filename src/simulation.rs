//! Guided single-packet simulation
//!
//! Drives one packet from Friend A to Friend B through a fixed pipeline:
//!
//! ```text
//! IDLE --send--> CLIENT --hop--> NETWORK_INTERCEPT --attacker forwards--> SERVER
//!                          \---> NETWORK_PASSTHROUGH --hop--------------> SERVER
//! ```
//!
//! Every transition is a timed step owned by a single [`TimerSlot`]. A reset
//! bumps the generation counter so a step that was already running when the
//! reset happened finds itself stale and does nothing.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::{ConfigContext, Toggles};
use crate::error::{Result, SimError};
use crate::ledger::ActivityLedger;
use crate::models::{generate_id, CertStatus, LogStatus, NewActivity, Packet, PacketStage};
use crate::timer::TimerSlot;

pub const SIM_SOURCE: &str = "Friend A (Simulation)";
pub const SIM_DESTINATION: &str = "Friend B (Simulation)";

/// Shown as the server's received data when the handshake fails
pub const REJECTED: &str = "ERROR: REJECTED";
pub const HANDSHAKE_FAILED: &str = "Handshake Failed: Invalid Cert.";
pub const INTEGRITY_VIOLATION: &str = "Integrity Violation: Data Corrupted.";
pub const ACCESS_DENIED: &str =
    "ACCESS DENIED: TLS Encryption Active. Packet bypassed interception.";

/// What the attacker console is doing with the intercepted packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackerPhase {
    Idle,
    /// Packet is parked at the interceptor; nothing moves until the attacker acts
    AwaitingAccess { intercepted: String },
    /// "Decrypt & inspect" is running
    Accessing { intercepted: String },
    /// Plaintext revealed; `buffer` is the attacker's editable copy
    Editing { intercepted: String, buffer: String },
}

/// Result shown by the receiving server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOutcome {
    Pending,
    Success(String),
    Failure(String),
}

/// Observable state of the guided simulation
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationView {
    pub packet: Option<Packet>,
    /// Raw data as received by the server
    pub server_data: Option<String>,
    pub attacker: AttackerPhase,
    pub outcome: ServerOutcome,
    /// Last user-facing notice (e.g. interception refused by TLS)
    pub notice: Option<String>,
}

impl SimulationView {
    fn empty() -> Self {
        Self {
            packet: None,
            server_data: None,
            attacker: AttackerPhase::Idle,
            outcome: ServerOutcome::Pending,
            notice: None,
        }
    }

    pub fn stage(&self) -> PacketStage {
        self.packet
            .as_ref()
            .map(|p| p.stage)
            .unwrap_or(PacketStage::Idle)
    }

    /// A packet exists and has not reached a terminal outcome
    pub fn is_in_flight(&self) -> bool {
        self.packet.is_some() && self.outcome == ServerOutcome::Pending
    }

    pub fn is_terminal(&self) -> bool {
        self.packet.is_some() && self.outcome != ServerOutcome::Pending
    }
}

#[derive(Debug)]
enum Step {
    ReachNetwork,
    AccessResolved,
    ArriveAtServer(String),
    DecodeAtServer(String),
}

struct SimState {
    view: SimulationView,
    /// Toggles captured when the packet was sent
    run: Toggles,
    timer: TimerSlot,
    generation: u64,
}

/// Guided simulation handle. Clones share the same packet.
#[derive(Clone)]
pub struct GuidedSimulation {
    state: Arc<Mutex<SimState>>,
    config: ConfigContext,
    ledger: ActivityLedger,
    updates: Arc<watch::Sender<SimulationView>>,
}

impl GuidedSimulation {
    pub fn new(config: ConfigContext, ledger: ActivityLedger) -> Self {
        let (updates, _) = watch::channel(SimulationView::empty());
        let run = config.toggles();
        Self {
            state: Arc::new(Mutex::new(SimState {
                view: SimulationView::empty(),
                run,
                timer: TimerSlot::new(),
                generation: 0,
            })),
            config,
            ledger,
            updates: Arc::new(updates),
        }
    }

    /// Current state snapshot
    pub fn view(&self) -> SimulationView {
        self.lock().view.clone()
    }

    /// Receives a snapshot after every transition
    pub fn subscribe(&self) -> watch::Receiver<SimulationView> {
        self.updates.subscribe()
    }

    /// Sends a new packet. Only one packet may be in flight at a time.
    pub fn send(&self, message: &str) -> Result<String> {
        if message.trim().is_empty() {
            return Err(SimError::EmptyMessage);
        }

        let mut state = self.lock();
        if state.view.is_in_flight() {
            let id = state
                .view
                .packet
                .as_ref()
                .map(|p| p.id.clone())
                .unwrap_or_default();
            return Err(SimError::PacketInFlight(id));
        }
        Self::clear(&mut state);

        let run = self.config.toggles();
        let display_content = if run.encryption {
            codec::encode(message)
        } else {
            message.to_string()
        };
        let mut packet = Packet {
            id: generate_id("SIM"),
            original_content: message.to_string(),
            display_content,
            is_encrypted: run.encryption,
            stage: PacketStage::Idle,
        };
        packet.advance(PacketStage::Client)?;
        let id = packet.id.clone();

        info!(
            "Packet {} sent (encryption: {}, mitm: {}, cert: {})",
            id, run.encryption, run.mitm, run.certificate
        );
        state.run = run;
        state.view.packet = Some(packet);
        let hop = self.config.timing().client_hop();
        self.schedule(&mut state, hop, Step::ReachNetwork);
        self.publish(&state);
        Ok(id)
    }

    /// Attacker "decrypt & inspect" on the parked packet
    pub fn inspect(&self) -> Result<()> {
        let mut state = self.lock();
        let intercepted = match &state.view.attacker {
            AttackerPhase::AwaitingAccess { intercepted } => intercepted.clone(),
            other => {
                return Err(SimError::InvalidState(format!(
                    "inspect requires a parked packet, attacker is {other:?}"
                )))
            }
        };
        state.view.attacker = AttackerPhase::Accessing { intercepted };
        let delay = self.config.timing().inspect();
        self.schedule(&mut state, delay, Step::AccessResolved);
        self.publish(&state);
        Ok(())
    }

    /// Replaces the attacker's editable copy of the payload
    pub fn edit(&self, text: &str) -> Result<()> {
        let mut state = self.lock();
        match &mut state.view.attacker {
            AttackerPhase::Editing { buffer, .. } => {
                *buffer = text.to_string();
            }
            other => {
                return Err(SimError::InvalidState(format!(
                    "edit requires revealed plaintext, attacker is {other:?}"
                )))
            }
        }
        self.publish(&state);
        Ok(())
    }

    /// Re-encrypts (if needed) the edit buffer and sends it on to the server
    pub fn forward(&self) -> Result<()> {
        let mut state = self.lock();
        let (intercepted, buffer) = match &state.view.attacker {
            AttackerPhase::Editing {
                intercepted,
                buffer,
            } => (intercepted.clone(), buffer.clone()),
            other => {
                return Err(SimError::InvalidState(format!(
                    "forward requires revealed plaintext, attacker is {other:?}"
                )))
            }
        };
        let packet_id = match &state.view.packet {
            Some(p) => p.id.clone(),
            None => return Err(SimError::InvalidState("no packet in flight".to_string())),
        };

        let encrypted = state.run.encryption;
        let outgoing = if encrypted {
            codec::encode(&buffer)
        } else {
            buffer.clone()
        };

        self.ledger.upsert(NewActivity {
            id: packet_id.clone(),
            source: SIM_SOURCE.to_string(),
            destination: SIM_DESTINATION.to_string(),
            incoming_payload: intercepted,
            tampered_message: buffer,
            decryption_key: codec::key_marker(encrypted).to_string(),
            outgoing_payload: Some(outgoing.clone()),
            status: LogStatus::Modified,
            is_encrypted: encrypted,
        });
        info!("Packet {} forwarded by attacker", packet_id);

        state.view.attacker = AttackerPhase::Idle;
        self.proceed_to_server(&mut state, outgoing);
        self.publish(&state);
        Ok(())
    }

    /// Discards the packet and every pending timer
    pub fn reset(&self) {
        let mut state = self.lock();
        Self::clear(&mut state);
        self.publish(&state);
        debug!("Guided simulation reset");
    }

    fn clear(state: &mut SimState) {
        state.timer.cancel();
        state.generation += 1;
        state.view = SimulationView::empty();
    }

    fn proceed_to_server(&self, state: &mut SimState, payload: String) {
        let delay = self.config.timing().forward();
        self.schedule(state, delay, Step::ArriveAtServer(payload));
    }

    fn schedule(&self, state: &mut SimState, delay: Duration, step: Step) {
        let sim = self.clone();
        let generation = state.generation;
        state.timer.arm(delay, async move {
            sim.fire(generation, step);
        });
    }

    fn fire(&self, generation: u64, step: Step) {
        let mut state = self.lock();
        if state.generation != generation {
            debug!("Dropping stale step {:?}", step);
            return;
        }
        state.timer.release();

        match step {
            Step::ReachNetwork => self.reach_network(&mut state),
            Step::AccessResolved => self.resolve_access(&mut state),
            Step::ArriveAtServer(payload) => self.arrive_at_server(&mut state, payload),
            Step::DecodeAtServer(payload) => Self::decode_at_server(&mut state, payload),
        }
        self.publish(&state);
    }

    fn reach_network(&self, state: &mut SimState) {
        let mitm = state.run.mitm;
        let Some(packet) = state.view.packet.as_mut() else {
            return;
        };
        let next = if mitm {
            PacketStage::NetworkIntercept
        } else {
            PacketStage::NetworkPassthrough
        };
        if let Err(e) = packet.advance(next) {
            warn!("{}", e);
            return;
        }
        let payload = packet.display_content.clone();
        debug!("Packet {} entered {}", packet.id, next);

        if mitm {
            state.view.attacker = AttackerPhase::AwaitingAccess {
                intercepted: payload,
            };
        } else {
            self.proceed_to_server(state, payload);
        }
    }

    fn resolve_access(&self, state: &mut SimState) {
        let intercepted = match &state.view.attacker {
            AttackerPhase::Accessing { intercepted } => intercepted.clone(),
            _ => return,
        };

        if state.run.encryption {
            warn!("{}", ACCESS_DENIED);
            state.view.notice = Some(ACCESS_DENIED.to_string());
            state.view.attacker = AttackerPhase::Idle;
            if let Some(packet) = &state.view.packet {
                self.ledger.upsert(NewActivity {
                    id: packet.id.clone(),
                    source: SIM_SOURCE.to_string(),
                    destination: SIM_DESTINATION.to_string(),
                    incoming_payload: intercepted.clone(),
                    tampered_message: String::new(),
                    decryption_key: codec::key_marker(true).to_string(),
                    outgoing_payload: None,
                    status: LogStatus::Forwarded,
                    is_encrypted: true,
                });
            }
            self.proceed_to_server(state, intercepted);
        } else {
            state.view.attacker = AttackerPhase::Editing {
                buffer: intercepted.clone(),
                intercepted,
            };
        }
    }

    fn arrive_at_server(&self, state: &mut SimState, payload: String) {
        let Some(packet) = state.view.packet.as_mut() else {
            return;
        };
        if let Err(e) = packet.advance(PacketStage::Server) {
            warn!("{}", e);
            return;
        }
        packet.display_content = payload.clone();

        if state.run.certificate == CertStatus::Invalid {
            info!("Packet {} rejected: invalid certificate", packet.id);
            state.view.server_data = Some(REJECTED.to_string());
            state.view.outcome = ServerOutcome::Failure(HANDSHAKE_FAILED.to_string());
            return;
        }

        state.view.server_data = Some(payload.clone());
        let delay = self.config.timing().decode();
        self.schedule(state, delay, Step::DecodeAtServer(payload));
    }

    fn decode_at_server(state: &mut SimState, payload: String) {
        let outcome = if state.run.encryption {
            let decoded = codec::decode(&payload);
            if codec::is_failure(&decoded) {
                ServerOutcome::Failure(INTEGRITY_VIOLATION.to_string())
            } else {
                ServerOutcome::Success(decoded)
            }
        } else {
            ServerOutcome::Success(payload)
        };
        info!("Server outcome: {:?}", outcome);
        state.view.outcome = outcome;
    }

    fn publish(&self, state: &SimState) {
        self.updates.send_replace(state.view.clone());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(encryption: bool) -> SimState {
        SimState {
            view: SimulationView::empty(),
            run: Toggles {
                encryption,
                ..Toggles::default()
            },
            timer: TimerSlot::new(),
            generation: 0,
        }
    }

    #[test]
    fn test_garbled_ciphertext_is_an_integrity_violation() {
        let mut state = state(true);
        GuidedSimulation::decode_at_server(&mut state, "not base64!".to_string());
        assert_eq!(
            state.view.outcome,
            ServerOutcome::Failure(INTEGRITY_VIOLATION.to_string())
        );
    }

    #[test]
    fn test_plaintext_is_accepted_as_is() {
        let mut state = state(false);
        GuidedSimulation::decode_at_server(&mut state, "not base64!".to_string());
        assert_eq!(
            state.view.outcome,
            ServerOutcome::Success("not base64!".to_string())
        );
    }
}
