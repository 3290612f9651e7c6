//! TUN device creation for the `up` command
//!
//! Routing only needs an interface name; this wrapper exists so the CLI
//! can bring one up itself. The device is destroyed when dropped.

use crate::config::ValidatedConfig;
use crate::platform::Platform;
use thiserror::Error;
use tracing::info;
use tun::AbstractDevice;

/// Name requested on Windows when the config does not set one
pub const WINDOWS_DEFAULT_NAME: &str = "vtun";

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to create tun interface: {0}")]
    Create(#[from] tun::Error),
    #[error("MTU {0} out of range for tun device")]
    Mtu(u32),
}

pub struct TunDevice {
    // Held for its lifetime: dropping it removes the interface
    _device: tun::Device,
    name: String,
}

impl TunDevice {
    pub fn create(config: &ValidatedConfig, platform: Platform) -> Result<Self, DeviceError> {
        let cfg = config.config();
        let mut tun_config = tun::Configuration::default();

        match (cfg.device_name.as_deref(), platform) {
            (Some(name), _) if !name.is_empty() => {
                tun_config.tun_name(name);
            }
            (_, Platform::Windows) => {
                tun_config.tun_name(WINDOWS_DEFAULT_NAME);
            }
            _ => {}
        }

        // Windows has no addressing step in the routing backend
        if platform == Platform::Windows {
            let mtu = u16::try_from(cfg.mtu).map_err(|_| DeviceError::Mtu(cfg.mtu))?;
            let v4 = config.cidr_v4();
            tun_config.address(v4.addr()).netmask(v4.netmask()).mtu(mtu);
            if let Ok(peer) = cfg.server_ipv4.parse::<std::net::Ipv4Addr>() {
                tun_config.destination(peer);
            }
            tun_config.up();
        }

        let device = tun::create(&tun_config)?;
        let name = device.tun_name()?;
        info!("interface created {}", name);

        Ok(Self {
            _device: device,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display() {
        let err = DeviceError::Mtu(70000);
        assert_eq!(err.to_string(), "MTU 70000 out of range for tun device");
    }
}
