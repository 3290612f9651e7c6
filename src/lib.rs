//! tunroute - tunnel interface provisioning and global-mode routing
//!
//! Configures the host side of a VPN tunnel interface: addresses, MTU and
//! link state, and for clients in global mode a split-default override that
//! sends all traffic through the tunnel while the tunnel server and DNS
//! server keep their original path. The override is reversed on shutdown.
//!
//! # Architecture
//!
//! - `config`: Configuration file handling (TOML) and validation
//! - `platform`: Per-OS command sequences (Linux, macOS, Windows)
//! - `vpn`: Address resolution, route planning and the session router
//! - `exec`: External command execution with a recording test double
//! - `device`: TUN device creation for the CLI
//!
//! # Usage
//!
//! ```bash
//! sudo tunroute up --interface tun0
//! tunroute plan --interface tun0 --adapter eth0 --platform darwin
//! ```

pub mod config;
pub mod device;
pub mod exec;
pub mod platform;
pub mod vpn;

pub use config::{TunnelConfig, ValidatedConfig};
pub use platform::{platform_of, Platform};
pub use vpn::{RouteReport, TunnelRouter};
