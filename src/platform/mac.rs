//! macOS-specific routing implementation

use super::{Platform, RoutingBackend};
use crate::config::ValidatedConfig;
use crate::vpn::plan::{RouteSet, SPLIT_DEFAULT_V4, SPLIT_DEFAULT_V6};
use crate::vpn::report::StepRunner;
use std::net::IpAddr;
use tracing::info;

pub struct MacRoutingManager;

impl MacRoutingManager {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MacRoutingManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingBackend for MacRoutingManager {
    fn platform(&self) -> Platform {
        Platform::Darwin
    }

    fn configure(&self, config: &ValidatedConfig, routes: &RouteSet, steps: &mut StepRunner<'_>) {
        let cfg = config.config();
        let iface = routes.interface.as_str();
        let v4 = config.cidr_v4().addr().to_string();
        let v6 = config.cidr_v6().addr().to_string();

        // ifconfig brings the point-to-point link up with the address
        steps.run(
            "assign ipv4 address",
            "ifconfig",
            &[iface, "inet", v4.as_str(), cfg.server_ipv4.as_str(), "up"],
        );
        steps.run(
            "assign ipv6 address",
            "ifconfig",
            &[iface, "inet6", v6.as_str(), cfg.server_ipv6.as_str(), "up"],
        );

        let Some(ref global) = routes.global else {
            return;
        };
        let server = global.server_ip.to_string();
        let gateway = global.local_gateway.as_str();
        info!(
            "Overriding default route via {} (server {} stays on {})",
            iface, server, gateway
        );

        // `add` fails when a default exists and `change` fails when none
        // does, so both are issued.
        match global.server_ip {
            IpAddr::V4(_) => {
                steps.run("server exception", "route", &["add", server.as_str(), gateway]);
                steps.run(
                    "add default route",
                    "route",
                    &["add", "default", cfg.server_ipv4.as_str()],
                );
                steps.run(
                    "change default route",
                    "route",
                    &["change", "default", cfg.server_ipv4.as_str()],
                );
            }
            IpAddr::V6(_) => {
                steps.run(
                    "server exception",
                    "route",
                    &["add", "-inet6", server.as_str(), gateway],
                );
                steps.run(
                    "add default route",
                    "route",
                    &["add", "-inet6", "default", cfg.server_ipv6.as_str()],
                );
                steps.run(
                    "change default route",
                    "route",
                    &["change", "-inet6", "default", cfg.server_ipv6.as_str()],
                );
            }
        }
        steps.run(
            "split default 0.0.0.0/1",
            "route",
            &["add", SPLIT_DEFAULT_V4[0], "-interface", iface],
        );
        steps.run(
            "split default 128.0.0.0/1",
            "route",
            &["add", SPLIT_DEFAULT_V4[1], "-interface", iface],
        );
        steps.run(
            "split default ::/1",
            "route",
            &["add", "-inet6", SPLIT_DEFAULT_V6, "-interface", iface],
        );
        steps.run("dns exception", "route", &["add", global.dns_ip.as_str(), gateway]);
    }

    fn reset(&self, _config: &ValidatedConfig, routes: &RouteSet, steps: &mut StepRunner<'_>) {
        let Some(ref global) = routes.global else {
            return;
        };
        let gateway = global.local_gateway.as_str();
        info!("Restoring default route via {}", gateway);
        steps.run("restore default route", "route", &["add", "default", gateway]);
        steps.run("force default route", "route", &["change", "default", gateway]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunnelConfig;
    use crate::exec::RecordingExecutor;
    use crate::vpn::plan::GlobalOverride;

    fn config() -> ValidatedConfig {
        TunnelConfig {
            cidr_v4: "10.0.0.2/24".to_string(),
            cidr_v6: "fced:9999::2/64".to_string(),
            global_mode: true,
            server_addr: "203.0.113.5:443".to_string(),
            server_ipv4: "10.0.0.1".to_string(),
            server_ipv6: "fced:9999::1".to_string(),
            local_gateway: "192.168.1.1".to_string(),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn routes(server_ip: &str) -> RouteSet {
        RouteSet {
            interface: "utun5".to_string(),
            global: Some(GlobalOverride {
                server_ip: server_ip.parse().unwrap(),
                physical_adapter: Some("en0".to_string()),
                local_gateway: "192.168.1.1".to_string(),
                dns_ip: "8.8.8.8".to_string(),
            }),
        }
    }

    #[test]
    fn test_configure_global_v4() {
        let exec = RecordingExecutor::new();
        let mut steps = StepRunner::new(&exec);
        MacRoutingManager::new().configure(&config(), &routes("203.0.113.5"), &mut steps);

        assert_eq!(
            exec.command_lines(),
            vec![
                "ifconfig utun5 inet 10.0.0.2 10.0.0.1 up",
                "ifconfig utun5 inet6 fced:9999::2 fced:9999::1 up",
                "route add 203.0.113.5 192.168.1.1",
                "route add default 10.0.0.1",
                "route change default 10.0.0.1",
                "route add 0.0.0.0/1 -interface utun5",
                "route add 128.0.0.0/1 -interface utun5",
                "route add -inet6 ::/1 -interface utun5",
                "route add 8.8.8.8 192.168.1.1",
            ]
        );
    }

    #[test]
    fn test_configure_global_v6_server() {
        let exec = RecordingExecutor::new();
        let mut steps = StepRunner::new(&exec);
        MacRoutingManager::new().configure(&config(), &routes("2001:db8::5"), &mut steps);

        let lines = exec.command_lines();
        assert_eq!(lines[2], "route add -inet6 2001:db8::5 192.168.1.1");
        assert_eq!(lines[3], "route add -inet6 default fced:9999::1");
        assert_eq!(lines[4], "route change -inet6 default fced:9999::1");
        assert_eq!(lines.len(), 9);
    }

    #[test]
    fn test_configure_without_override() {
        let exec = RecordingExecutor::new();
        let mut steps = StepRunner::new(&exec);
        MacRoutingManager::new(
            ).configure(&config(),
            &RouteSet::interface_only("utun5"),
            &mut steps,
        );

        let lines = exec.command_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with("ifconfig ")));
    }

    #[test]
    fn test_reset_restores_default() {
        let exec = RecordingExecutor::new();
        let mut steps = StepRunner::new(&exec);
        MacRoutingManager::new().reset(&config(), &routes("203.0.113.5"), &mut steps);

        assert_eq!(
            exec.command_lines(),
            vec!["route add default 192.168.1.1", "route change default 192.168.1.1"]
        );
    }

    #[test]
    fn test_reset_tolerates_existing_default() {
        let exec = RecordingExecutor::new().fail_on("route add default");
        let mut steps = StepRunner::new(&exec);
        MacRoutingManager::new().reset(&config(), &routes("203.0.113.5"), &mut steps);

        let report = steps.finish();
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.applied(), 1);
        assert_eq!(report.steps[1].step, "force default route");
    }

    #[test]
    fn test_reset_without_override_emits_nothing() {
        let exec = RecordingExecutor::new();
        let mut steps = StepRunner::new(&exec);
        MacRoutingManager::new().reset(&config(), &RouteSet::interface_only("utun5"), &mut steps);
        assert!(exec.calls().is_empty());
    }
}
