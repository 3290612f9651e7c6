//! Configuration handling for tunroute

use crate::vpn::resolver::{parse_prefix, ResolveError};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl From<ResolveError> for ConfigError {
    fn from(err: ResolveError) -> Self {
        ConfigError::InvalidConfig(err.to_string())
    }
}

/// How the Linux backend undoes its override routes on reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinuxTeardown {
    /// Delete every route the session installed
    #[default]
    Explicit,
    /// Leave it to the kernel dropping routes when the interface goes away
    Interface,
}

/// Declarative tunnel configuration, read-only for the life of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Requested interface name (platform default when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    /// Local tunnel IPv4 address with prefix length
    pub cidr_v4: String,
    /// Local tunnel IPv6 address with prefix length
    pub cidr_v6: String,
    pub mtu: u32,
    /// This node terminates tunnels
    pub server_mode: bool,
    /// Route all host traffic through the tunnel (client only)
    pub global_mode: bool,
    /// Tunnel server as `host:port` or `ip:port`
    pub server_addr: String,
    /// Tunnel endpoint IPv4 (point-to-point peer / replacement gateway)
    pub server_ipv4: String,
    /// Tunnel endpoint IPv6
    pub server_ipv6: String,
    /// Host default gateway captured before any override; discovered when empty
    pub local_gateway: String,
    pub dns_ip: String,
    pub linux_teardown: LinuxTeardown,
    pub command_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            cidr_v4: "172.16.0.10/24".to_string(),
            cidr_v6: "fced:9999::9999/64".to_string(),
            mtu: 1500,
            server_mode: false,
            global_mode: false,
            server_addr: ":3001".to_string(),
            server_ipv4: "172.16.0.1".to_string(),
            server_ipv6: "fced:9999::1".to_string(),
            local_gateway: String::new(),
            dns_ip: "8.8.8.8".to_string(),
            linux_teardown: LinuxTeardown::Explicit,
            command_timeout_secs: 5,
        }
    }
}

impl TunnelConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: TunnelConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `tunroute.toml` in the working directory, then
    /// `~/.tunroute/config.toml`, falling back to defaults
    pub fn discover() -> Result<Self, ConfigError> {
        match default_locations().into_iter().find(|p| p.exists()) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    /// Client sessions that want the default route overridden
    pub fn wants_global_override(&self) -> bool {
        !self.server_mode && self.global_mode
    }

    /// Check prefixes and MTU before anything touches the host
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let cidr_v4 = match parse_prefix(&self.cidr_v4)? {
            IpNet::V4(net) => net,
            IpNet::V6(_) => {
                return Err(ConfigError::InvalidConfig(format!(
                    "cidr_v4 is not an IPv4 prefix: {}",
                    self.cidr_v4
                )));
            }
        };
        let cidr_v6 = match parse_prefix(&self.cidr_v6)? {
            IpNet::V6(net) => net,
            IpNet::V4(_) => {
                return Err(ConfigError::InvalidConfig(format!(
                    "cidr_v6 is not an IPv6 prefix: {}",
                    self.cidr_v6
                )));
            }
        };
        if self.mtu == 0 {
            return Err(ConfigError::InvalidConfig("mtu must be positive".into()));
        }

        Ok(ValidatedConfig {
            config: self.clone(),
            cidr_v4,
            cidr_v6,
        })
    }
}

/// Search order used by [`TunnelConfig::discover`]
pub fn default_locations() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("tunroute.toml")];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".tunroute").join("config.toml"));
    }
    paths
}

/// A config whose prefixes and MTU have been checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    config: TunnelConfig,
    cidr_v4: Ipv4Net,
    cidr_v6: Ipv6Net,
}

impl ValidatedConfig {
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    pub fn cidr_v4(&self) -> Ipv4Net {
        self.cidr_v4
    }

    pub fn cidr_v6(&self) -> Ipv6Net {
        self.cidr_v6
    }
}
