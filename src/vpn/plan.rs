//! What a session installs and must later remove
//!
//! The global override is decided once, from the config and the topology
//! resolved at configure time. The resulting [`RouteSet`] carries every
//! address the teardown needs, so reset never has to look at routes this
//! process did not create.

use crate::config::ValidatedConfig;
use crate::platform::Platform;
use crate::vpn::resolver::AddressResolver;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use thiserror::Error;
use tracing::debug;

/// Two halves of the IPv4 space, each more specific than `0.0.0.0/0`
pub const SPLIT_DEFAULT_V4: [&str; 2] = ["0.0.0.0/1", "128.0.0.0/1"];

/// IPv6 counterpart of the split default
pub const SPLIT_DEFAULT_V6: &str = "::/1";

/// Something the override depends on could not be determined
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct InterfaceUnavailable(pub String);

/// Host facts resolved at configure time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub physical_adapter: Option<String>,
    pub server_ip: Option<IpAddr>,
    /// Gateway read from the routing table, used when the config has none
    pub discovered_gateway: Option<IpAddr>,
}

impl Topology {
    /// Probe the host; only client sessions in global mode need anything
    pub fn discover(resolver: &AddressResolver<'_>, config: &ValidatedConfig) -> Self {
        let config = config.config();
        if !config.wants_global_override() {
            return Self::default();
        }

        let server_ip = resolver.resolve_server_ip(&config.server_addr);
        let physical_adapter = match resolver.platform() {
            Platform::Linux | Platform::Darwin => resolver.current_physical_adapter(),
            Platform::Windows | Platform::Unsupported => None,
        };
        let discovered_gateway = if config.local_gateway.trim().is_empty() {
            resolver.current_gateway()
        } else {
            None
        };

        let topology = Self {
            physical_adapter,
            server_ip,
            discovered_gateway,
        };
        debug!("Resolved topology: {:?}", topology);
        topology
    }
}

/// The default-route override a client session installs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalOverride {
    /// Resolved tunnel server, exempted from the override
    pub server_ip: IpAddr,
    /// Adapter the exceptions leave through (Linux and Darwin)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_adapter: Option<String>,
    /// Pre-override default gateway
    pub local_gateway: String,
    pub dns_ip: String,
}

/// Entries this session is responsible for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSet {
    pub interface: String,
    pub global: Option<GlobalOverride>,
}

impl RouteSet {
    /// Addressing only, no override
    pub fn interface_only(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            global: None,
        }
    }

    /// Decide what the session installs on `platform`
    ///
    /// Returns the set together with the reason the override was dropped,
    /// if it was requested but cannot be installed.
    pub fn for_session(
        config: &ValidatedConfig,
        interface: &str,
        platform: Platform,
        topology: &Topology,
    ) -> (Self, Option<InterfaceUnavailable>) {
        match plan_override(config, platform, topology) {
            Ok(global) => (
                Self {
                    interface: interface.to_string(),
                    global,
                },
                None,
            ),
            Err(unavailable) => (Self::interface_only(interface), Some(unavailable)),
        }
    }

    pub fn has_override(&self) -> bool {
        self.global.is_some()
    }
}

fn plan_override(
    config: &ValidatedConfig,
    platform: Platform,
    topology: &Topology,
) -> Result<Option<GlobalOverride>, InterfaceUnavailable> {
    let cfg = config.config();
    if !cfg.wants_global_override() || !platform.is_supported() {
        return Ok(None);
    }

    let server_ip = topology.server_ip.ok_or_else(|| {
        InterfaceUnavailable(format!("server address {} not resolvable", cfg.server_addr))
    })?;

    let physical_adapter = match platform {
        Platform::Linux | Platform::Darwin => Some(
            topology
                .physical_adapter
                .clone()
                .ok_or_else(|| InterfaceUnavailable("physical adapter unknown".into()))?,
        ),
        Platform::Windows | Platform::Unsupported => None,
    };

    let local_gateway = if cfg.local_gateway.trim().is_empty() {
        topology
            .discovered_gateway
            .map(|gw| gw.to_string())
            .ok_or_else(|| InterfaceUnavailable("local gateway unknown".into()))?
    } else {
        cfg.local_gateway.trim().to_string()
    };

    Ok(Some(GlobalOverride {
        server_ip,
        physical_adapter,
        local_gateway,
        dns_ip: cfg.dns_ip.trim().to_string(),
    }))
}
