//! Core data models shared by the guided simulation, the sandbox and the ledger

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, SimError};

/// Generates a short packet id such as `PKT-4K2ZQ`
pub fn generate_id(prefix: &str) -> String {
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut n = uuid::Uuid::new_v4().as_u128();
    let suffix: String = (0..5)
        .map(|_| {
            let c = ALPHABET[(n % 36) as usize] as char;
            n /= 36;
            c
        })
        .collect();
    format!("{prefix}-{suffix}")
}

/// Certificate presented by the receiving server
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertStatus {
    #[default]
    Valid,
    Invalid,
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertStatus::Valid => write!(f, "VALID"),
            CertStatus::Invalid => write!(f, "INVALID"),
        }
    }
}

/// Position of the guided packet in the pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketStage {
    Idle,
    Client,
    NetworkIntercept,
    NetworkPassthrough,
    Server,
}

impl PacketStage {
    fn rank(self) -> u8 {
        match self {
            PacketStage::Idle => 0,
            PacketStage::Client => 1,
            PacketStage::NetworkIntercept | PacketStage::NetworkPassthrough => 2,
            PacketStage::Server => 3,
        }
    }
}

impl fmt::Display for PacketStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketStage::Idle => write!(f, "IDLE"),
            PacketStage::Client => write!(f, "CLIENT"),
            PacketStage::NetworkIntercept => write!(f, "NETWORK_INTERCEPT"),
            PacketStage::NetworkPassthrough => write!(f, "NETWORK_PASSTHROUGH"),
            PacketStage::Server => write!(f, "SERVER"),
        }
    }
}

/// The single packet driven through the guided simulation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub id: String,
    pub original_content: String,
    /// What is visible on the wire right now
    pub display_content: String,
    pub is_encrypted: bool,
    pub stage: PacketStage,
}

impl Packet {
    /// Moves the packet forward. Stages never regress.
    pub fn advance(&mut self, next: PacketStage) -> Result<()> {
        if next.rank() <= self.stage.rank() {
            return Err(SimError::InvalidState(format!(
                "packet {} cannot move from {} to {}",
                self.id, self.stage, next
            )));
        }
        self.stage = next;
        Ok(())
    }
}

/// Transport protocol of a sandbox record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn from_transport_security(active: bool) -> Self {
        if active {
            Protocol::Https
        } else {
            Protocol::Http
        }
    }

    pub fn port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "HTTP"),
            Protocol::Https => write!(f, "HTTPS"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordStatus {
    Captured,
    Completed,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordStatus::Captured => write!(f, "CAPTURED"),
            RecordStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Where a sandbox record came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordOrigin {
    /// Generated locally by the traffic generator
    Sandbox,
    /// Ingested from the shared peer document store
    Peer,
    /// Reported by the forward proxy
    Proxy,
}

/// Synthetic traffic template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficKind {
    P2p,
    Api,
}

impl TrafficKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "p2p" => Some(TrafficKind::P2p),
            "api" => Some(TrafficKind::Api),
            _ => None,
        }
    }
}

/// A captured request in the hacker sandbox
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficRecord {
    pub id: String,
    pub timestamp: DateTime<Local>,
    pub method: String,
    pub endpoint: String,
    pub port: u16,
    pub protocol: Protocol,
    pub headers: HashMap<String, String>,
    /// Current plaintext, overwritten on tampered delivery
    pub body: String,
    /// Computed once at capture time, never refreshed from `body`
    pub ciphertext: Option<String>,
    pub status: RecordStatus,
    pub origin: RecordOrigin,
}

impl TrafficRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// What an interceptor sees on the wire
    pub fn wire_payload(&self) -> &str {
        self.ciphertext.as_deref().unwrap_or(&self.body)
    }
}

/// Ledger row status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Intercepted,
    Modified,
    Forwarded,
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogStatus::Intercepted => write!(f, "intercepted"),
            LogStatus::Modified => write!(f, "modified"),
            LogStatus::Forwarded => write!(f, "forwarded"),
        }
    }
}

/// One row of the forensic activity ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub id: String,
    pub timestamp: DateTime<Local>,
    pub source: String,
    pub destination: String,
    pub incoming_payload: String,
    /// Plaintext typed by the interceptor
    pub tampered_message: String,
    pub decryption_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outgoing_payload: Option<String>,
    pub status: LogStatus,
    pub is_encrypted: bool,
}

/// A ledger write before it is timestamped
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub id: String,
    pub source: String,
    pub destination: String,
    pub incoming_payload: String,
    pub tampered_message: String,
    pub decryption_key: String,
    pub outgoing_payload: Option<String>,
    pub status: LogStatus,
    pub is_encrypted: bool,
}

impl NewActivity {
    pub(crate) fn into_entry(self, timestamp: DateTime<Local>) -> ActivityLogEntry {
        ActivityLogEntry {
            id: self.id,
            timestamp,
            source: self.source,
            destination: self.destination,
            incoming_payload: self.incoming_payload,
            tampered_message: self.tampered_message,
            decryption_key: self.decryption_key,
            outgoing_payload: self.outgoing_payload,
            status: self.status,
            is_encrypted: self.is_encrypted,
        }
    }
}

/// Raw request metadata reported by the forward proxy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxyCapture {
    pub id: String,
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub timestamp: String,
}
