//! Persisted record of an installed global override
//!
//! Written when `configure` installs an override and removed once it has
//! been reset. After a crash, `down` reads it back instead of looking at
//! the routing table, which by then points into the tunnel.

use crate::config::ConfigError;
use crate::platform::Platform;
use crate::vpn::plan::{GlobalOverride, RouteSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub platform: Platform,
    pub interface: String,
    pub global: GlobalOverride,
}

impl SessionRecord {
    /// Record for `routes`, if the session installed an override
    pub fn from_routes(platform: Platform, routes: &RouteSet) -> Option<Self> {
        let global = routes.global.clone()?;
        Some(Self {
            platform,
            interface: routes.interface.clone(),
            global,
        })
    }

    pub fn route_set(&self) -> RouteSet {
        RouteSet {
            interface: self.interface.clone(),
            global: Some(self.global.clone()),
        }
    }

    /// `~/.tunroute/session.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".tunroute").join("session.toml"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        debug!("Session record written to {}", path.display());
        Ok(())
    }

    /// Load the record at `path` if one exists; unreadable records are
    /// logged and treated as absent
    pub fn find(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match Self::load(path) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring session record {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn remove(path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Session record {} removed", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove session record {}: {}", path.display(), e),
        }
    }
}
