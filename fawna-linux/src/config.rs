//! Load config from file and environment.

use fawna_core::config::{NodeConfig, ScanMode};
use fawna_core::Capability;
use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/fawna/config.toml or /etc/fawna/config.toml.
/// Env overrides: FAWNA_DEVICE_NAME, FAWNA_DISCOVERY_PORT, FAWNA_TRANSPORT_PORT,
/// FAWNA_ROLE_SWITCH_MS, FAWNA_SCAN_MODE.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Advert multicast UDP port (default 45680).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Link TCP port (default 45681).
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,
    /// Capabilities the emulated platform grants: scan, connect, advertise, location.
    #[serde(default = "default_permissions")]
    pub permissions: Vec<String>,
    /// Mesh node settings (`[node]` table).
    #[serde(default)]
    pub node: NodeConfig,
}

fn default_discovery_port() -> u16 {
    45680
}
fn default_transport_port() -> u16 {
    45681
}
fn default_permissions() -> Vec<String> {
    Capability::ALL.iter().map(|c| c.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            transport_port: default_transport_port(),
            permissions: default_permissions(),
            node: NodeConfig::default(),
        }
    }
}

impl Config {
    /// Granted capabilities as a mask (see `Capability::bit`). Unknown names are skipped.
    pub fn permission_mask(&self) -> u32 {
        let mut mask = 0;
        for name in &self.permissions {
            match Capability::ALL
                .iter()
                .find(|c| c.to_string().eq_ignore_ascii_case(name.trim()))
            {
                Some(c) => mask |= c.bit(),
                None => tracing::warn!(permission = %name, "unknown permission in config"),
            }
        }
        mask
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("FAWNA_DEVICE_NAME") {
        c.node.device_name = Some(s);
    }
    if let Some(s) = var("FAWNA_DISCOVERY_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.discovery_port = p;
        }
    }
    if let Some(s) = var("FAWNA_TRANSPORT_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.transport_port = p;
        }
    }
    if let Some(s) = var("FAWNA_ROLE_SWITCH_MS") {
        if let Ok(ms) = s.parse::<u64>() {
            c.node.role_switch_interval_ms = ms;
        }
    }
    if let Some(s) = var("FAWNA_SCAN_MODE") {
        match s.to_ascii_lowercase().as_str() {
            "service" => c.node.scan_mode = ScanMode::Service,
            "name" => c.node.scan_mode = ScanMode::Name,
            other => tracing::warn!(scan_mode = other, "ignoring unknown FAWNA_SCAN_MODE"),
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/fawna/config.toml"));
    }
    out.push(PathBuf::from("/etc/fawna/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => tracing::warn!(path = %p.display(), error = %e, "invalid config file, using defaults"),
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "cannot read config file"),
            }
            break;
        }
    }
    None
}
