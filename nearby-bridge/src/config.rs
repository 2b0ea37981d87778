//! Load bridge config from file and environment.

use nearby_core::Strategy;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Bridge configuration. File: ~/.config/nearby/config.toml or /etc/nearby/config.toml.
/// Env overrides: NEARBY_SERVICE_ID.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub client: nearby_core::Config,
    /// Simulated stations on the loopback medium.
    #[serde(default = "default_peers")]
    pub peers: Vec<PeerConfig>,
}

/// One simulated station. It advertises under `name` with `strategy`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    pub name: String,
    #[serde(default = "default_strategy")]
    pub strategy: Strategy,
    /// Accept incoming connections (reject otherwise).
    #[serde(default = "default_true")]
    pub auto_accept: bool,
    /// Send every received payload back to its sender.
    #[serde(default = "default_true")]
    pub echo: bool,
}

fn default_peers() -> Vec<PeerConfig> {
    vec![PeerConfig {
        name: "B".to_string(),
        strategy: default_strategy(),
        auto_accept: true,
        echo: true,
    }]
}
fn default_strategy() -> Strategy {
    Strategy::Star
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: nearby_core::Config::default(),
            peers: default_peers(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    c.client.apply_env();
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/nearby/config.toml"));
    }
    out.push(PathBuf::from("/etc/nearby/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => warn!(path = %p.display(), error = %e, "ignoring invalid config"),
                },
                Err(e) => warn!(path = %p.display(), error = %e, "cannot read config"),
            }
            break;
        }
    }
    None
}
