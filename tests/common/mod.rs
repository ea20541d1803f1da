//! Common test utilities

#![allow(dead_code)]

use securecomm::config::{SimConfig, Toggles};
use securecomm::models::CertStatus;
use securecomm::session::Session;
use std::time::Duration;

/// Default timings with the given guided-simulation switches
pub fn sim_config(encryption: bool, mitm: bool, certificate: CertStatus) -> SimConfig {
    SimConfig {
        toggles: Toggles {
            encryption,
            mitm,
            certificate,
            ..Toggles::default()
        },
        ..SimConfig::default()
    }
}

/// Default timings with the given sandbox switches
pub fn sandbox_config(interception: bool, transport_security: bool) -> SimConfig {
    SimConfig {
        toggles: Toggles {
            interception,
            transport_security,
            ..Toggles::default()
        },
        ..SimConfig::default()
    }
}

pub fn session(config: &SimConfig) -> Session {
    Session::new(config)
}

/// Advances (paused) time by `ms` milliseconds
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
