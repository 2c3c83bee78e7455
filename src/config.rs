//! Configuration handling for gw-routes

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

const LOCAL_CONFIG: &str = "gw-routes.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default)]
    pub devices: DeviceConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub system_info: SystemInfoConfig,
}

/// How kernel device names map onto the appliance's ports
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Physical LAN ports in UI order ("Lan 1", "Lan 2")
    pub lan_ports: Vec<String>,
    pub tunnel_prefixes: Vec<String>,
    pub vpn_marker: String,
    pub default_tunnel: String,
    pub vlan_interfaces_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub rules_path: PathBuf,
    pub loader_path: PathBuf,
    pub hook_path: PathBuf,
    pub boot_delay_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemInfoConfig {
    /// Command printing `{"interfaces": [...]}` JSON. When unset the
    /// payload is derived from `ip -o -4 addr show`.
    pub command: Option<String>,
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/var/lib/gw-routes/rules.json")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            devices: DeviceConfig::default(),
            mirror: MirrorConfig::default(),
            system_info: SystemInfoConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            lan_ports: vec!["eth0".to_string(), "eth1".to_string()],
            tunnel_prefixes: vec!["tun".to_string(), "tap".to_string()],
            vpn_marker: "vpn".to_string(),
            default_tunnel: "tun0".to_string(),
            vlan_interfaces_file: PathBuf::from("/etc/network/interfaces"),
        }
    }
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from("/etc/gw-routes/static_routes"),
            loader_path: PathBuf::from("/etc/gw-routes/load_routes.sh"),
            hook_path: PathBuf::from("/etc/rc.local"),
            boot_delay_secs: 15,
        }
    }
}

impl DeviceConfig {
    /// Tunnel and vendor VPN devices get the gateway-optional routing policy.
    pub fn is_vpn_device(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        self.tunnel_prefixes
            .iter()
            .any(|prefix| lower.starts_with(&prefix.to_ascii_lowercase()))
            || (!self.vpn_marker.is_empty()
                && lower.contains(&self.vpn_marker.to_ascii_lowercase()))
    }

    /// Device behind "Lan N", 1-based
    pub fn lan_port(&self, port: usize) -> Option<&str> {
        port.checked_sub(1)
            .and_then(|index| self.lan_ports.get(index))
            .map(String::as_str)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `./gw-routes.toml`, then the user config directory, else defaults
    pub fn discover() -> Result<Self, ConfigError> {
        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Self::load(&local);
        }

        if let Some(dir) = dirs::config_dir() {
            let user = dir.join("gw-routes").join("config.toml");
            if user.exists() {
                return Self::load(&user);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }
}
