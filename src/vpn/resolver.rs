//! Address parsing, server resolution and default route discovery
//!
//! Everything here is read-only with respect to the host: prefixes are
//! parsed in-process, the server address goes through the system resolver
//! and the adapter/gateway are read from the routing table via the
//! platform's own tools.

use crate::exec::{CommandExecutor, Invocation};
use crate::platform::Platform;
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Invalid network prefix: {0}")]
    InvalidPrefix(String),
}

/// Parse `address/prefix-length` notation
///
/// The host part is kept (`10.0.0.1/24` stays `10.0.0.1/24`) since the
/// prefix doubles as the interface address.
pub fn parse_prefix(text: &str) -> Result<IpNet, ResolveError> {
    text.trim()
        .parse::<IpNet>()
        .map_err(|_| ResolveError::InvalidPrefix(text.to_string()))
}

/// Pick the IP out of a `host:port`, `[v6]:port`, bare IP or bare hostname
/// without touching DNS. Returns the host part to resolve otherwise.
fn literal_or_host(server_addr: &str) -> Result<IpAddr, &str> {
    let trimmed = server_addr.trim();
    if let Ok(sock) = trimmed.parse::<SocketAddr>() {
        return Ok(sock.ip());
    }
    if let Ok(ip) = trimmed.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return Ok(ip);
    }
    match trimmed.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => Err(host),
        _ => Err(trimmed),
    }
}

pub struct AddressResolver<'a> {
    exec: &'a dyn CommandExecutor,
    platform: Platform,
    adapter_override: Option<String>,
}

impl<'a> AddressResolver<'a> {
    pub fn new(exec: &'a dyn CommandExecutor, platform: Platform) -> Self {
        Self {
            exec,
            platform,
            adapter_override: None,
        }
    }

    /// Use this adapter instead of reading it from the routing table
    pub fn with_adapter(mut self, adapter: Option<String>) -> Self {
        self.adapter_override = adapter.filter(|a| !a.is_empty());
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Resolve the tunnel server to a concrete IP
    ///
    /// `None` means "not resolvable right now"; callers skip the exception
    /// routes rather than abort.
    pub fn resolve_server_ip(&self, server_addr: &str) -> Option<IpAddr> {
        let host = match literal_or_host(server_addr) {
            Ok(ip) => {
                debug!("Server address {} is literal {}", server_addr, ip);
                return Some(ip);
            }
            Err(host) => host,
        };
        if host.is_empty() {
            warn!("Server address {:?} has no host part", server_addr);
            return None;
        }

        match (host, 0).to_socket_addrs() {
            Ok(addrs) => {
                let addrs: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
                let ip = addrs
                    .iter()
                    .find(|ip| ip.is_ipv4())
                    .or_else(|| addrs.first())
                    .copied();
                match ip {
                    Some(ip) => info!("System DNS resolved {} -> {}", host, ip),
                    None => warn!("No IP addresses found for server {}", host),
                }
                ip
            }
            Err(e) => {
                warn!("Failed to resolve server {}: {}", host, e);
                None
            }
        }
    }

    /// The adapter currently carrying the default route
    pub fn current_physical_adapter(&self) -> Option<String> {
        if let Some(ref adapter) = self.adapter_override {
            return Some(adapter.clone());
        }
        let adapter = match self.platform {
            Platform::Linux => {
                let table = self.read_default_route()?;
                field_after(&table, "dev")
            }
            Platform::Darwin => {
                let table = self.read_default_route()?;
                labelled_field(&table, "interface")
            }
            Platform::Windows | Platform::Unsupported => None,
        };
        match adapter {
            Some(ref name) => debug!("Physical adapter: {}", name),
            None => warn!("Could not determine physical adapter"),
        }
        adapter
    }

    /// The gateway of the current default route
    pub fn current_gateway(&self) -> Option<IpAddr> {
        let raw = match self.platform {
            Platform::Linux => field_after(&self.read_default_route()?, "via"),
            Platform::Darwin => labelled_field(&self.read_default_route()?, "gateway"),
            Platform::Windows => lowest_metric_gateway(&self.read_default_route()?),
            Platform::Unsupported => None,
        }?;
        raw.parse().ok()
    }

    fn read_default_route(&self) -> Option<String> {
        let invocation = match self.platform {
            Platform::Linux => Invocation::new("/sbin/ip", ["route", "show", "default"]),
            Platform::Darwin => Invocation::new("route", ["-n", "get", "default"]),
            Platform::Windows => Invocation::new("cmd", ["/C", "route", "print", "0.0.0.0"]),
            Platform::Unsupported => return None,
        };
        match self.exec.run(&invocation) {
            Ok(output) if output.success() => Some(output.stdout),
            Ok(output) => {
                warn!("{} failed: {}", invocation, output.stderr.trim());
                None
            }
            Err(e) => {
                warn!("{} failed: {}", invocation, e);
                None
            }
        }
    }
}

/// `default via 192.168.1.1 dev eth0` -> value following `key`
fn field_after(table: &str, key: &str) -> Option<String> {
    for line in table.lines() {
        let mut parts = line.split_whitespace();
        while let Some(tok) = parts.next() {
            if tok == key {
                if let Some(value) = parts.next() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// `  interface: en0` -> `en0`
fn labelled_field(table: &str, label: &str) -> Option<String> {
    table.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == label)
            .then(|| value.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// `route print 0.0.0.0` -> gateway of the preferred IPv4 default
///
/// Rows read `0.0.0.0  0.0.0.0  <gateway>  <interface>  <metric>`. On-link
/// entries have no gateway address and are ignored.
fn lowest_metric_gateway(table: &str) -> Option<String> {
    table
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            match cols.as_slice() {
                ["0.0.0.0", "0.0.0.0", gateway, _, metric] => {
                    let gateway = gateway.parse::<IpAddr>().ok()?;
                    Some((metric.parse::<u32>().ok()?, gateway))
                }
                _ => None,
            }
        })
        .min_by_key(|(metric, _)| *metric)
        .map(|(_, gateway)| gateway.to_string())
}
