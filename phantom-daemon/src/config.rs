//! Daemon configuration
//!
//! One listening endpoint per interface, plus an optional startup script of
//! control commands to run before any client connects. Loaded from a JSON
//! file named on the command line; every field has a default so a partial
//! (or absent) config file works.

use std::path::{Path, PathBuf};

use anyhow::Context;
use phantom_net::EndpointConfig;
use serde::{Deserialize, Serialize};

const DEFAULT_CONTROL_PORT: u16 = 6401;
const DEFAULT_COMMAND_PORT: u16 = 6402;
const DEFAULT_LINK_PORT: u16 = 6403;
const DEFAULT_LOW_ENERGY_PORT: u16 = 6404;

fn default_control() -> EndpointConfig {
    EndpointConfig::loopback(DEFAULT_CONTROL_PORT)
}

fn default_command() -> EndpointConfig {
    EndpointConfig::loopback(DEFAULT_COMMAND_PORT)
}

fn default_link() -> EndpointConfig {
    EndpointConfig::loopback(DEFAULT_LINK_PORT)
}

fn default_low_energy() -> EndpointConfig {
    EndpointConfig::loopback(DEFAULT_LOW_ENERGY_PORT)
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Control interface endpoint (single session at a time)
    #[serde(default = "default_control")]
    pub control: EndpointConfig,
    /// Command interface endpoint
    #[serde(default = "default_command")]
    pub command: EndpointConfig,
    /// Link interface endpoint
    #[serde(default = "default_link")]
    pub link: EndpointConfig,
    /// Low-energy link interface endpoint
    #[serde(default = "default_low_energy")]
    pub low_energy: EndpointConfig,
    /// Control-command script dispatched before any client connects
    #[serde(default)]
    pub startup_script: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control: default_control(),
            command: default_command(),
            link: default_link(),
            low_energy: default_low_energy(),
            startup_script: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    /// All interfaces on loopback ephemeral ports; used by tests
    pub fn ephemeral() -> Self {
        Self {
            control: EndpointConfig::loopback(0),
            command: EndpointConfig::loopback(0),
            link: EndpointConfig::loopback(0),
            low_energy: EndpointConfig::loopback(0),
            startup_script: None,
        }
    }
}
