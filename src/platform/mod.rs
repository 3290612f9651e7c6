//! Platform-specific implementations
//!
//! Each supported OS gets a [`RoutingBackend`] that turns a validated
//! config and a [`RouteSet`] into that OS's command sequence. Backends only
//! build commands and hand them to a [`StepRunner`], so all of them compile
//! and can be exercised on any host.

pub mod linux;
pub mod mac;
pub mod windows;

use crate::config::ValidatedConfig;
use crate::vpn::plan::RouteSet;
use crate::vpn::report::StepRunner;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Routing model the host follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Darwin,
    Windows,
    Unsupported,
}

impl Platform {
    /// Platform of the running binary
    pub fn current() -> Self {
        platform_of(std::env::consts::OS)
    }

    pub fn is_supported(&self) -> bool {
        *self != Platform::Unsupported
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::Linux => "linux",
            Platform::Darwin => "darwin",
            Platform::Windows => "windows",
            Platform::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// Map an OS identifier (`std::env::consts::OS` or a GOOS-style name)
pub fn platform_of(os: &str) -> Platform {
    match os.trim().to_ascii_lowercase().as_str() {
        "linux" => Platform::Linux,
        "darwin" | "macos" => Platform::Darwin,
        "windows" => Platform::Windows,
        _ => Platform::Unsupported,
    }
}

/// Install and remove a session's addressing and routes on one OS
pub trait RoutingBackend: Send + Sync {
    fn platform(&self) -> Platform;

    /// Addressing, MTU and link-up, then the global override if `routes`
    /// carries one. Interface steps always precede route steps.
    fn configure(&self, config: &ValidatedConfig, routes: &RouteSet, steps: &mut StepRunner<'_>);

    /// Undo the global override recorded in `routes`; nothing otherwise
    fn reset(&self, config: &ValidatedConfig, routes: &RouteSet, steps: &mut StepRunner<'_>);
}

/// Get the backend for a platform
pub fn backend_for(platform: Platform) -> Box<dyn RoutingBackend> {
    match platform {
        Platform::Linux => Box::new(linux::LinuxRoutingManager::new()),
        Platform::Darwin => Box::new(mac::MacRoutingManager::new()),
        Platform::Windows => Box::new(windows::WindowsRoutingManager::new()),
        Platform::Unsupported => Box::new(UnsupportedRoutingManager),
    }
}

/// Logs and leaves the host untouched
pub struct UnsupportedRoutingManager;

impl RoutingBackend for UnsupportedRoutingManager {
    fn platform(&self) -> Platform {
        Platform::Unsupported
    }

    fn configure(&self, _config: &ValidatedConfig, routes: &RouteSet, _steps: &mut StepRunner<'_>) {
        warn!(
            "Unsupported OS {}, interface {} left unconfigured",
            std::env::consts::OS,
            routes.interface
        );
    }

    fn reset(&self, _config: &ValidatedConfig, _routes: &RouteSet, _steps: &mut StepRunner<'_>) {
        warn!("Unsupported OS {}, nothing to reset", std::env::consts::OS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunnelConfig;
    use crate::exec::RecordingExecutor;

    #[test]
    fn test_platform_of() {
        assert_eq!(platform_of("linux"), Platform::Linux);
        assert_eq!(platform_of("darwin"), Platform::Darwin);
        assert_eq!(platform_of("macos"), Platform::Darwin);
        assert_eq!(platform_of("windows"), Platform::Windows);
        assert_eq!(platform_of("Windows"), Platform::Windows);
        assert_eq!(platform_of("freebsd"), Platform::Unsupported);
        assert_eq!(platform_of(""), Platform::Unsupported);
    }

    #[test]
    fn test_platform_display() {
        assert_eq!(Platform::Linux.to_string(), "linux");
        assert_eq!(Platform::Darwin.to_string(), "darwin");
        assert_eq!(Platform::Windows.to_string(), "windows");
        assert_eq!(Platform::Unsupported.to_string(), "unsupported");
        assert!(!Platform::Unsupported.is_supported());
    }

    #[test]
    fn test_current_platform() {
        #[cfg(target_os = "linux")]
        assert_eq!(Platform::current(), Platform::Linux);
        #[cfg(target_os = "macos")]
        assert_eq!(Platform::current(), Platform::Darwin);
        #[cfg(target_os = "windows")]
        assert_eq!(Platform::current(), Platform::Windows);
    }

    #[test]
    fn test_backend_for_matches_platform() {
        for platform in [
            Platform::Linux,
            Platform::Darwin,
            Platform::Windows,
            Platform::Unsupported,
        ] {
            assert_eq!(backend_for(platform).platform(), platform);
        }
    }

    #[test]
    fn test_unsupported_backend_emits_nothing() {
        let config = TunnelConfig {
            global_mode: true,
            ..Default::default()
        }
        .validate()
        .unwrap();
        let routes = RouteSet::interface_only("tun0");
        let exec = RecordingExecutor::new();
        let backend = backend_for(Platform::Unsupported);

        let mut steps = StepRunner::new(&exec);
        backend.configure(&config, &routes, &mut steps);
        backend.reset(&config, &routes, &mut steps);

        assert!(steps.finish().steps.is_empty());
        assert!(exec.calls().is_empty());
    }
}
