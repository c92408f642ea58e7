//! Daemon configuration (spec.md §6).
//!
//! A single immutable value built once at startup and passed by `Arc`
//! reference into every component (§9: "process-global mutable ckpool
//! config becomes a single immutable configuration value").

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtcNetwork {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl BtcNetwork {
    /// Bech32/bech32m human-readable part for this network (§4.7).
    pub fn hrp(&self) -> &'static str {
        match self {
            BtcNetwork::Mainnet => "bc",
            BtcNetwork::Testnet | BtcNetwork::Signet => "tb",
            BtcNetwork::Regtest => "bcrt",
        }
    }

    /// Base58Check P2PKH version byte (§4.7).
    pub fn p2pkh_version(&self) -> u8 {
        match self {
            BtcNetwork::Mainnet => 0x00,
            BtcNetwork::Testnet | BtcNetwork::Signet | BtcNetwork::Regtest => 0x6F,
        }
    }

    /// Base58Check P2SH version byte (§4.7).
    pub fn p2sh_version(&self) -> u8 {
        match self {
            BtcNetwork::Mainnet => 0x05,
            BtcNetwork::Testnet | BtcNetwork::Signet | BtcNetwork::Regtest => 0xC4,
        }
    }

    /// GBT `rules` that must be requested of the node (§4.1, §9 open question:
    /// the minimum required set is hard-coded here; a node-specific superset
    /// may be required and is the operator's responsibility to configure).
    pub fn gbt_rules(&self) -> Vec<&'static str> {
        match self {
            BtcNetwork::Signet => vec!["segwit", "signet"],
            _ => vec!["segwit"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Standalone,
    Primary,
    Relay,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Standalone
    }
}

fn default_true() -> bool {
    true
}

/// §4.4 vardiff shape parameters. Absolute `min_diff`/`max_diff` bounds live
/// on [`GantryConfig`] itself since spec.md §6 lists them once at top level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VardiffConfig {
    pub target_interval_s: f64,
    pub ema_alpha: f64,
    pub dead_band_low: f64,
    pub dead_band_high: f64,
    pub dampening: f64,
    pub cooldown_s: u64,
    pub fast_ramp_threshold: f64,
    pub fast_ramp_max_jump: f64,
    pub reconnect_ttl_s: u64,
}

impl Default for VardiffConfig {
    fn default() -> Self {
        VardiffConfig {
            target_interval_s: 10.0,
            ema_alpha: 0.3,
            dead_band_low: 0.8,
            dead_band_high: 1.2,
            dampening: 0.5,
            cooldown_s: 30,
            fast_ramp_threshold: 4.0,
            fast_ramp_max_jump: 64.0,
            reconnect_ttl_s: 86_400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Per-session JSON-RPC messages per second (§4.2).
    pub session_messages_per_s: u32,
    /// Per-IP new connections per second (§4.2).
    pub connections_per_ip_per_s: u32,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        RateLimitsConfig {
            session_messages_per_s: 100,
            connections_per_ip_per_s: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GantryConfig {
    pub btc_network: BtcNetwork,
    pub bitcoin_rpc_url: String,
    pub bitcoin_rpc_user: String,
    pub bitcoin_rpc_pass: String,
    pub zmq_url: String,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub nats_url: Option<String>,
    pub event_socket_path: String,
    pub region: String,
    pub pool_signature: String,
    pub payout_address: String,
    #[serde(default = "default_stratum_port")]
    pub stratum_port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub primary_url: Option<String>,
    #[serde(default = "default_failover_timeout")]
    pub failover_timeout_s: u64,
    #[serde(default)]
    pub vardiff: VardiffConfig,
    #[serde(default = "default_min_diff")]
    pub min_diff: f64,
    #[serde(default = "default_max_diff")]
    pub max_diff: f64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    /// Maximum recent-stale workbases retained (§3, §9 open question: capped
    /// at 16 per the spec's default; implementer's choice, documented here).
    #[serde(default = "default_max_workbases")]
    pub max_workbases: usize,
    /// Grace period in seconds during which shares against a stale workbase
    /// are still accepted (§4.1, §8).
    #[serde(default = "default_workbase_grace_s")]
    pub workbase_grace_s: u64,
    #[serde(default = "default_event_ring_capacity")]
    pub event_ring_capacity: usize,
    #[serde(default = "default_true")]
    pub rpc_enabled: bool,
    #[serde(default = "default_shutdown_grace_s")]
    pub shutdown_grace_s: u64,
    /// `region -> metrics base URL` for every peer region, used by the
    /// aggregated health endpoint (§4.8). Not part of the original
    /// configuration surface; a region has no other way to discover its
    /// peers' metrics endpoints, so this is added rather than left unsolved.
    #[serde(default)]
    pub peers: HashMap<String, String>,
}

fn default_stratum_port() -> u16 {
    3333
}
fn default_metrics_port() -> u16 {
    9100
}
fn default_health_port() -> u16 {
    8090
}
fn default_relay_port() -> u16 {
    8881
}
fn default_failover_timeout() -> u64 {
    10
}
fn default_min_diff() -> f64 {
    1.0
}
fn default_max_diff() -> f64 {
    1_000_000_000.0
}
fn default_max_sessions() -> usize {
    50_000
}
fn default_max_workbases() -> usize {
    16
}
fn default_workbase_grace_s() -> u64 {
    60
}
fn default_event_ring_capacity() -> usize {
    65_536
}
fn default_shutdown_grace_s() -> u64 {
    10
}

impl GantryConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.display().to_string(),
            source,
        })?;
        let cfg: GantryConfig = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == Mode::Relay && self.primary_url.is_none() {
            return Err(ConfigError::Invalid(
                "mode=relay requires primary_url".into(),
            ));
        }
        if self.min_diff <= 0.0 || self.max_diff < self.min_diff {
            return Err(ConfigError::Invalid(
                "min_diff/max_diff must satisfy 0 < min_diff <= max_diff".into(),
            ));
        }
        if self.pool_signature.len() > 20 {
            return Err(ConfigError::Invalid(
                "pool_signature must be <= 20 bytes".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_when_absent() {
        let json = r#"{
            "btc_network": "mainnet",
            "bitcoin_rpc_url": "http://127.0.0.1:8332",
            "bitcoin_rpc_user": "user",
            "bitcoin_rpc_pass": "pass",
            "zmq_url": "tcp://127.0.0.1:28332",
            "event_socket_path": "/tmp/gantry.sock",
            "region": "us-east",
            "pool_signature": "gantry",
            "payout_address": "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        }"#;
        let cfg: GantryConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.stratum_port, 3333);
        assert_eq!(cfg.max_sessions, 50_000);
        assert_eq!(cfg.vardiff.target_interval_s, 10.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn relay_mode_requires_primary_url() {
        let json = r#"{
            "btc_network": "mainnet",
            "bitcoin_rpc_url": "http://127.0.0.1:8332",
            "bitcoin_rpc_user": "user",
            "bitcoin_rpc_pass": "pass",
            "zmq_url": "tcp://127.0.0.1:28332",
            "event_socket_path": "/tmp/gantry.sock",
            "region": "eu-west",
            "pool_signature": "gantry",
            "payout_address": "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
            "mode": "relay"
        }"#;
        let cfg: GantryConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.validate().is_err());
    }
}
