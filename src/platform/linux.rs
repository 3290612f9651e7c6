//! Linux-specific routing implementation (iproute2)

use super::{Platform, RoutingBackend};
use crate::config::{LinuxTeardown, ValidatedConfig};
use crate::vpn::plan::{GlobalOverride, RouteSet, SPLIT_DEFAULT_V4, SPLIT_DEFAULT_V6};
use crate::vpn::report::StepRunner;
use std::net::IpAddr;
use tracing::{debug, info};

const IP: &str = "/sbin/ip";

pub struct LinuxRoutingManager;

impl LinuxRoutingManager {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LinuxRoutingManager {
    fn default() -> Self {
        Self::new()
    }
}

/// `ip [-6] route <verb> <server>/32|/64 via <gw> dev <phy>`
fn server_exception(verb: &str, global: &GlobalOverride, adapter: &str) -> Vec<String> {
    let mut args = Vec::with_capacity(9);
    let dest = match global.server_ip {
        IpAddr::V4(ip) => format!("{}/32", ip),
        IpAddr::V6(ip) => {
            args.push("-6".to_string());
            format!("{}/64", ip)
        }
    };
    args.extend(
        ["route", verb, dest.as_str(), "via", global.local_gateway.as_str(), "dev", adapter]
            .map(String::from),
    );
    args
}

fn dns_exception(verb: &str, global: &GlobalOverride, adapter: &str) -> Vec<String> {
    let dest = format!("{}/32", global.dns_ip);
    ["route", verb, dest.as_str(), "via", global.local_gateway.as_str(), "dev", adapter]
        .map(String::from)
        .to_vec()
}

impl RoutingBackend for LinuxRoutingManager {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn configure(&self, config: &ValidatedConfig, routes: &RouteSet, steps: &mut StepRunner<'_>) {
        let iface = routes.interface.as_str();
        let mtu = config.config().mtu.to_string();
        let v4 = config.cidr_v4().to_string();
        let v6 = config.cidr_v6().to_string();

        steps.run("set mtu", IP, &["link", "set", "dev", iface, "mtu", mtu.as_str()]);
        steps.run("add ipv4 address", IP, &["addr", "add", v4.as_str(), "dev", iface]);
        steps.run("add ipv6 address", IP, &["-6", "addr", "add", v6.as_str(), "dev", iface]);
        steps.run("link up", IP, &["link", "set", "dev", iface, "up"]);

        let Some(ref global) = routes.global else {
            return;
        };
        let Some(adapter) = global.physical_adapter.as_deref() else {
            steps.skip("global override", "physical adapter unknown");
            return;
        };

        info!(
            "Overriding default route via {} (server {} and dns {} stay on {})",
            iface, global.server_ip, global.dns_ip, adapter
        );
        steps.run("server exception", IP, &server_exception("add", global, adapter));
        steps.run(
            "split default 0.0.0.0/1",
            IP,
            &["route", "add", SPLIT_DEFAULT_V4[0], "dev", iface],
        );
        steps.run(
            "split default ::/1",
            IP,
            &["-6", "route", "add", SPLIT_DEFAULT_V6, "dev", iface],
        );
        steps.run(
            "split default 128.0.0.0/1",
            IP,
            &["route", "add", SPLIT_DEFAULT_V4[1], "dev", iface],
        );
        steps.run("dns exception", IP, &dns_exception("add", global, adapter));
    }

    fn reset(&self, config: &ValidatedConfig, routes: &RouteSet, steps: &mut StepRunner<'_>) {
        let Some(ref global) = routes.global else {
            return;
        };
        if config.config().linux_teardown == LinuxTeardown::Interface {
            debug!(
                "Leaving override routes on {} to be dropped with the interface",
                routes.interface
            );
            return;
        }
        let Some(adapter) = global.physical_adapter.as_deref() else {
            return;
        };
        let iface = routes.interface.as_str();

        steps.run("remove dns exception", IP, &dns_exception("del", global, adapter));
        steps.run(
            "remove split default 128.0.0.0/1",
            IP,
            &["route", "del", SPLIT_DEFAULT_V4[1], "dev", iface],
        );
        steps.run(
            "remove split default ::/1",
            IP,
            &["-6", "route", "del", SPLIT_DEFAULT_V6, "dev", iface],
        );
        steps.run(
            "remove split default 0.0.0.0/1",
            IP,
            &["route", "del", SPLIT_DEFAULT_V4[0], "dev", iface],
        );
        steps.run("remove server exception", IP, &server_exception("del", global, adapter));
    }
}
