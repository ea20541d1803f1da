//! Configuration management for the simulator

use crate::error::{Result, SimError};
use crate::models::CertStatus;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Live switches read by every flow
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Toggles {
    /// Guided simulation: obfuscate the payload end to end
    pub encryption: bool,
    /// Guided simulation: route the packet through the attacker
    pub mitm: bool,
    /// Guided simulation: certificate presented by the receiver
    pub certificate: CertStatus,
    /// Sandbox: the interception engine traps captured traffic
    pub interception: bool,
    /// Sandbox: records are captured over HTTPS
    pub transport_security: bool,
}

impl Default for Toggles {
    fn default() -> Self {
        Self {
            encryption: true,
            mitm: false,
            certificate: CertStatus::Valid,
            interception: true,
            transport_security: true,
        }
    }
}

/// Simulated network delays, in milliseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timings {
    pub client_hop_ms: u64,
    pub forward_ms: u64,
    pub decode_ms: u64,
    pub inspect_ms: u64,
    pub deliver_ms: u64,
    pub brute_force_ms: u64,
    pub brute_force_tick_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            client_hop_ms: 1200,
            forward_ms: 1000,
            decode_ms: 1200,
            inspect_ms: 2500,
            deliver_ms: 500,
            brute_force_ms: 1200,
            brute_force_tick_ms: 50,
        }
    }
}

impl Timings {
    pub fn client_hop(&self) -> Duration {
        Duration::from_millis(self.client_hop_ms)
    }

    pub fn forward(&self) -> Duration {
        Duration::from_millis(self.forward_ms)
    }

    pub fn decode(&self) -> Duration {
        Duration::from_millis(self.decode_ms)
    }

    pub fn inspect(&self) -> Duration {
        Duration::from_millis(self.inspect_ms)
    }

    pub fn deliver(&self) -> Duration {
        Duration::from_millis(self.deliver_ms)
    }

    pub fn brute_force_tick(&self) -> Duration {
        Duration::from_millis(self.brute_force_tick_ms)
    }

    /// Number of ticks the brute-force progress bar takes
    pub fn brute_force_steps(&self) -> u32 {
        (self.brute_force_ms / self.brute_force_tick_ms.max(1)).max(1) as u32
    }
}

/// Listener settings for `serve`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub capture_port: u16,
    pub proxy_port: u16,
    pub realtime_port: u16,
    /// Origins allowed to call the capture endpoint from a browser
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            capture_port: 3001,
            proxy_port: 8080,
            realtime_port: 3002,
            allowed_origins: Vec::new(),
        }
    }
}

/// Complete simulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    pub toggles: Toggles,
    pub timing: Timings,
    pub server: ServerSettings,
}

/// Shared, read-mostly view of the live toggles.
///
/// Cloning is cheap; all clones observe the same switches.
#[derive(Debug, Clone)]
pub struct ConfigContext {
    toggles: Arc<RwLock<Toggles>>,
    timing: Timings,
}

impl ConfigContext {
    pub fn new(toggles: Toggles, timing: Timings) -> Self {
        Self {
            toggles: Arc::new(RwLock::new(toggles)),
            timing,
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        Self::new(config.toggles, config.timing)
    }

    /// Snapshot of the current toggles
    pub fn toggles(&self) -> Toggles {
        *self.toggles.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn timing(&self) -> Timings {
        self.timing
    }

    /// Applies `f` to the toggles and returns the previous value
    pub(crate) fn update(&self, f: impl FnOnce(&mut Toggles)) -> Toggles {
        let mut toggles = self.toggles.write().unwrap_or_else(|e| e.into_inner());
        let previous = *toggles;
        f(&mut toggles);
        previous
    }
}

impl Default for ConfigContext {
    fn default() -> Self {
        Self::new(Toggles::default(), Timings::default())
    }
}

/// File-based configuration structure
#[derive(Debug, Deserialize)]
struct FileConfig {
    simulation: Option<SimulationSection>,
    sandbox: Option<SandboxSection>,
    timing: Option<TimingSection>,
    server: Option<ServerSection>,
}

#[derive(Debug, Deserialize)]
struct SimulationSection {
    encryption: Option<bool>,
    mitm: Option<bool>,
    certificate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SandboxSection {
    interception: Option<bool>,
    transport_security: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TimingSection {
    client_hop_ms: Option<u64>,
    forward_ms: Option<u64>,
    decode_ms: Option<u64>,
    inspect_ms: Option<u64>,
    deliver_ms: Option<u64>,
    brute_force_ms: Option<u64>,
    brute_force_tick_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    host: Option<String>,
    capture_port: Option<u16>,
    proxy_port: Option<u16>,
    realtime_port: Option<u16>,
    allowed_origins: Option<Vec<String>>,
}

/// Parses a certificate status name (`valid` / `invalid`)
pub fn parse_cert_status(value: &str) -> Result<CertStatus> {
    match value.to_ascii_lowercase().as_str() {
        "valid" => Ok(CertStatus::Valid),
        "invalid" => Ok(CertStatus::Invalid),
        other => Err(SimError::ConfigError(format!(
            "unknown certificate status '{other}' (expected valid or invalid)"
        ))),
    }
}

/// Loads configuration from a TOML file and merges with defaults
pub fn load_config(path: &Path) -> Result<SimConfig> {
    let content = std::fs::read_to_string(path).map_err(SimError::IoError)?;
    parse_config(&content)
}

/// Parses TOML configuration text and merges with defaults
pub fn parse_config(content: &str) -> Result<SimConfig> {
    let file_config: FileConfig = toml::from_str(content)?;
    let mut config = SimConfig::default();

    if let Some(sim) = file_config.simulation {
        if let Some(encryption) = sim.encryption {
            config.toggles.encryption = encryption;
        }
        if let Some(mitm) = sim.mitm {
            config.toggles.mitm = mitm;
        }
        if let Some(cert) = sim.certificate {
            config.toggles.certificate = parse_cert_status(&cert)?;
        }
    }

    if let Some(sandbox) = file_config.sandbox {
        if let Some(interception) = sandbox.interception {
            config.toggles.interception = interception;
        }
        if let Some(tls) = sandbox.transport_security {
            config.toggles.transport_security = tls;
        }
    }

    if let Some(timing) = file_config.timing {
        let t = &mut config.timing;
        t.client_hop_ms = timing.client_hop_ms.unwrap_or(t.client_hop_ms);
        t.forward_ms = timing.forward_ms.unwrap_or(t.forward_ms);
        t.decode_ms = timing.decode_ms.unwrap_or(t.decode_ms);
        t.inspect_ms = timing.inspect_ms.unwrap_or(t.inspect_ms);
        t.deliver_ms = timing.deliver_ms.unwrap_or(t.deliver_ms);
        t.brute_force_ms = timing.brute_force_ms.unwrap_or(t.brute_force_ms);
        t.brute_force_tick_ms = timing.brute_force_tick_ms.unwrap_or(t.brute_force_tick_ms);
        if t.brute_force_tick_ms == 0 {
            return Err(SimError::ConfigError(
                "timing.brute_force_tick_ms must be greater than zero".to_string(),
            ));
        }
    }

    if let Some(server) = file_config.server {
        let s = &mut config.server;
        if let Some(host) = server.host {
            s.host = host;
        }
        s.capture_port = server.capture_port.unwrap_or(s.capture_port);
        s.proxy_port = server.proxy_port.unwrap_or(s.proxy_port);
        s.realtime_port = server.realtime_port.unwrap_or(s.realtime_port);
        if let Some(origins) = server.allowed_origins {
            s.allowed_origins = origins;
        }
    }

    Ok(config)
}

/// Merges CLI arguments into an existing SimConfig
pub fn merge_cli_args(
    config: &mut SimConfig,
    capture_port: Option<u16>,
    proxy_port: Option<u16>,
    realtime_port: Option<u16>,
    origins: Option<Vec<String>>,
) {
    if let Some(p) = capture_port {
        config.server.capture_port = p;
    }
    if let Some(p) = proxy_port {
        config.server.proxy_port = p;
    }
    if let Some(p) = realtime_port {
        config.server.realtime_port = p;
    }
    if let Some(o) = origins {
        config.server.allowed_origins = o;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, SimConfig::default());
        assert!(config.toggles.encryption);
        assert!(!config.toggles.mitm);
        assert_eq!(config.server.capture_port, 3001);
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = parse_config(
            r#"
            [simulation]
            mitm = true
            certificate = "invalid"

            [sandbox]
            transport_security = false

            [timing]
            inspect_ms = 10

            [server]
            proxy_port = 9090
            allowed_origins = ["https://example.test"]
            "#,
        )
        .unwrap();

        assert!(config.toggles.mitm);
        assert_eq!(config.toggles.certificate, CertStatus::Invalid);
        assert!(!config.toggles.transport_security);
        assert_eq!(config.timing.inspect_ms, 10);
        assert_eq!(config.timing.client_hop_ms, 1200);
        assert_eq!(config.server.proxy_port, 9090);
        assert_eq!(config.server.allowed_origins, vec!["https://example.test"]);
    }

    #[test]
    fn test_unknown_certificate_rejected() {
        let err = parse_config("[simulation]\ncertificate = \"expired\"").unwrap_err();
        assert!(matches!(err, SimError::ConfigError(_)));
    }

    #[test]
    fn test_zero_tick_rejected() {
        assert!(parse_config("[timing]\nbrute_force_tick_ms = 0").is_err());
    }

    #[test]
    fn test_brute_force_steps() {
        assert_eq!(Timings::default().brute_force_steps(), 24);
    }

    #[test]
    fn test_context_update_visible_to_clones() {
        let ctx = ConfigContext::default();
        let clone = ctx.clone();
        let previous = ctx.update(|t| t.mitm = true);
        assert!(!previous.mitm);
        assert!(clone.toggles().mitm);
    }
}
