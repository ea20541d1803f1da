//! Wiring of one simulator session
//!
//! A session owns the shared configuration context, the ledger and console,
//! and the three flows that write to them. Toggle setters live here so a
//! change to a guided-simulation switch always resets the in-flight packet.

use std::sync::Arc;
use tracing::debug;

use crate::bridge::{InterceptionBridge, TamperRelay};
use crate::config::{ConfigContext, SimConfig};
use crate::console::ConsoleLog;
use crate::ledger::{ActivityLedger, LedgerStats};
use crate::models::CertStatus;
use crate::sandbox::Sandbox;
use crate::simulation::GuidedSimulation;
use crate::store::PacketStore;

pub struct Session {
    config: ConfigContext,
    ledger: ActivityLedger,
    console: ConsoleLog,
    simulation: GuidedSimulation,
    sandbox: Sandbox,
    bridge: InterceptionBridge,
}

impl Session {
    /// Session without an outbound relay
    pub fn new(config: &SimConfig) -> Self {
        Self::build(config, None)
    }

    /// Session whose sandbox relays tampered peer packets to `store`
    pub fn with_store(config: &SimConfig, store: Arc<dyn PacketStore>) -> Self {
        Self::build(config, Some(store))
    }

    fn build(config: &SimConfig, store: Option<Arc<dyn PacketStore>>) -> Self {
        let context = ConfigContext::from_config(config);
        let ledger = ActivityLedger::new();
        let console = ConsoleLog::new();

        let simulation = GuidedSimulation::new(context.clone(), ledger.clone());
        let mut sandbox = Sandbox::new(context.clone(), ledger.clone(), console.clone());
        if let Some(store) = store {
            sandbox = sandbox.with_relay(TamperRelay::new(store, console.clone()));
        }
        let bridge = InterceptionBridge::new(sandbox.clone(), context.clone(), console.clone());

        Self {
            config: context,
            ledger,
            console,
            simulation,
            sandbox,
            bridge,
        }
    }

    pub fn config(&self) -> &ConfigContext {
        &self.config
    }

    pub fn ledger(&self) -> &ActivityLedger {
        &self.ledger
    }

    pub fn console(&self) -> &ConsoleLog {
        &self.console
    }

    pub fn simulation(&self) -> &GuidedSimulation {
        &self.simulation
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn bridge(&self) -> &InterceptionBridge {
        &self.bridge
    }

    pub fn stats(&self) -> LedgerStats {
        self.ledger.stats()
    }

    pub fn set_encryption(&self, on: bool) {
        self.config.update(|t| t.encryption = on);
        self.simulation.reset();
    }

    pub fn set_mitm(&self, on: bool) {
        self.config.update(|t| t.mitm = on);
        self.simulation.reset();
    }

    pub fn set_certificate(&self, status: CertStatus) {
        self.config.update(|t| t.certificate = status);
        self.simulation.reset();
    }

    /// Sandbox switch; affects records captured from now on
    pub fn set_interception(&self, on: bool) {
        self.config.update(|t| t.interception = on);
        debug!("Interception engine {}", if on { "on" } else { "off" });
    }

    /// Sandbox switch; affects records captured from now on
    pub fn set_transport_security(&self, on: bool) {
        self.config.update(|t| t.transport_security = on);
        debug!("Transport security {}", if on { "on" } else { "off" });
    }
}
