//! Windows-specific routing implementation
//!
//! Addressing is done when the adapter is created, so only the global
//! override is handled here. The replacement default route gets metric 6
//! and the exceptions metric 5, which keeps the server and DNS routes
//! preferred over the tunnel default.

use super::{Platform, RoutingBackend};
use crate::config::ValidatedConfig;
use crate::vpn::plan::RouteSet;
use crate::vpn::report::StepRunner;
use std::net::IpAddr;
use tracing::info;

const DEFAULT_METRIC: &str = "6";
const EXCEPTION_METRIC: &str = "5";

pub struct WindowsRoutingManager;

impl WindowsRoutingManager {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WindowsRoutingManager {
    fn default() -> Self {
        Self::new()
    }
}

/// `cmd /C route ...`
fn route<S: AsRef<str>>(steps: &mut StepRunner<'_>, step: &str, args: &[S]) -> bool {
    let mut full: Vec<&str> = vec!["/C", "route"];
    full.extend(args.iter().map(AsRef::<str>::as_ref));
    steps.run(step, "cmd", &full)
}

/// Swap the default route of the server's address family for one via `gateway`
fn replace_default(steps: &mut StepRunner<'_>, server_ip: IpAddr, gateway: &str, phase: &str) {
    match server_ip {
        IpAddr::V4(_) => {
            route(
                steps,
                &format!("{phase}: delete default route"),
                &["delete", "0.0.0.0", "mask", "0.0.0.0"],
            );
            route(
                steps,
                &format!("{phase}: add default route"),
                &["add", "0.0.0.0", "mask", "0.0.0.0", gateway, "metric", DEFAULT_METRIC],
            );
        }
        IpAddr::V6(_) => {
            route(
                steps,
                &format!("{phase}: delete default route"),
                &["-6", "delete", "::/0", "mask", "::/0"],
            );
            route(
                steps,
                &format!("{phase}: add default route"),
                &["-6", "add", "::/0", "mask", "::/0", gateway, "metric", DEFAULT_METRIC],
            );
        }
    }
}

impl RoutingBackend for WindowsRoutingManager {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn configure(&self, config: &ValidatedConfig, routes: &RouteSet, steps: &mut StepRunner<'_>) {
        let Some(ref global) = routes.global else {
            return;
        };
        let cfg = config.config();
        let server = global.server_ip.to_string();
        let gateway = global.local_gateway.as_str();
        info!(
            "Overriding default route via {} (server {} stays on {})",
            routes.interface, server, gateway
        );

        match global.server_ip {
            IpAddr::V4(_) => {
                replace_default(steps, global.server_ip, &cfg.server_ipv4, "override");
                route(
                    steps,
                    "server exception",
                    &["add", server.as_str(), gateway, "metric", EXCEPTION_METRIC],
                );
            }
            IpAddr::V6(_) => {
                replace_default(steps, global.server_ip, &cfg.server_ipv6, "override");
                route(
                    steps,
                    "server exception",
                    &["-6", "add", server.as_str(), gateway, "metric", EXCEPTION_METRIC],
                );
            }
        }
        route(
            steps,
            "dns exception",
            &["add", global.dns_ip.as_str(), gateway, "metric", EXCEPTION_METRIC],
        );
    }

    fn reset(&self, _config: &ValidatedConfig, routes: &RouteSet, steps: &mut StepRunner<'_>) {
        let Some(ref global) = routes.global else {
            return;
        };
        info!("Restoring default route via {}", global.local_gateway);
        replace_default(steps, global.server_ip, &global.local_gateway, "restore");
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
            global_mode: true,
            server_addr: "203.0.113.5:443".to_string(),
            server_ipv4: "172.16.0.1".to_string(),
            server_ipv6: "fced:9999::1".to_string(),
            local_gateway: "192.168.1.1".to_string(),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn routes(server_ip: &str) -> RouteSet {
        RouteSet {
            interface: "vtun".to_string(),
            global: Some(GlobalOverride {
                server_ip: server_ip.parse().unwrap(),
                physical_adapter: None,
                local_gateway: "192.168.1.1".to_string(),
                dns_ip: "8.8.8.8".to_string(),
            }),
        }
    }

    #[test]
    fn test_configure_global_v4() {
        let exec = RecordingExecutor::new();
        let mut steps = StepRunner::new(&exec);
        WindowsRoutingManager::new().configure(&config(), &routes("203.0.113.5"), &mut steps);

        assert_eq!(
            exec.command_lines(),
            vec![
                "cmd /C route delete 0.0.0.0 mask 0.0.0.0",
                "cmd /C route add 0.0.0.0 mask 0.0.0.0 172.16.0.1 metric 6",
                "cmd /C route add 203.0.113.5 192.168.1.1 metric 5",
                "cmd /C route add 8.8.8.8 192.168.1.1 metric 5",
            ]
        );
    }

    #[test]
    fn test_configure_global_v6() {
        let exec = RecordingExecutor::new();
        let mut steps = StepRunner::new(&exec);
        WindowsRoutingManager::new().configure(&config(), &routes("2001:db8::5"), &mut steps);

        assert_eq!(
            exec.command_lines(),
            vec![
                "cmd /C route -6 delete ::/0 mask ::/0",
                "cmd /C route -6 add ::/0 mask ::/0 fced:9999::1 metric 6",
                "cmd /C route -6 add 2001:db8::5 192.168.1.1 metric 5",
                "cmd /C route add 8.8.8.8 192.168.1.1 metric 5",
            ]
        );
    }

    #[test]
    fn test_exception_metric_beats_default() {
        let default: u32 = DEFAULT_METRIC.parse().unwrap();
        let exception: u32 = EXCEPTION_METRIC.parse().unwrap();
        assert!(exception < default);
    }

    #[test]
    fn test_configure_without_override_is_silent() {
        let exec = RecordingExecutor::new();
        let mut steps = StepRunner::new(&exec);
        WindowsRoutingManager::new(
            ).configure(&config(),
            &RouteSet::interface_only("vtun"),
            &mut steps,
        );
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_reset_restores_original_gateway() {
        let exec = RecordingExecutor::new();
        let mut steps = StepRunner::new(&exec);
        WindowsRoutingManager::new().reset(&config(), &routes("203.0.113.5"), &mut steps);

        assert_eq!(
            exec.command_lines(),
            vec![
                "cmd /C route delete 0.0.0.0 mask 0.0.0.0",
                "cmd /C route add 0.0.0.0 mask 0.0.0.0 192.168.1.1 metric 6",
            ]
        );
    }

    #[test]
    fn test_reset_v6_family() {
        let exec = RecordingExecutor::new();
        let mut steps = StepRunner::new(&exec);
        WindowsRoutingManager::new().reset(&config(), &routes("2001:db8::5"), &mut steps);

        assert_eq!(
            exec.command_lines(),
            vec![
                "cmd /C route -6 delete ::/0 mask ::/0",
                "cmd /C route -6 add ::/0 mask ::/0 192.168.1.1 metric 6",
            ]
        );
    }
}
