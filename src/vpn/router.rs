//! Session-scoped route ownership
//!
//! [`TunnelRouter`] is the acquire/release pair around the host routing
//! table: `configure` installs and records a [`RouteSet`], `reset` removes
//! exactly what was recorded, at most once. Dropping the router resets it,
//! so every shutdown path that unwinds restores the host. An installed
//! override is also written to a [`SessionRecord`] file so `recover` can
//! undo it after a crash.

use crate::config::{ConfigError, ValidatedConfig};
use crate::exec::CommandExecutor;
use crate::platform::{backend_for, Platform, RoutingBackend};
use crate::vpn::plan::{RouteSet, Topology};
use crate::vpn::report::{RouteReport, StepRunner};
use crate::vpn::resolver::AddressResolver;
use crate::vpn::state::SessionRecord;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Interface {0} is already configured")]
    AlreadyConfigured(String),
    #[error("Interface name is empty")]
    NoInterface,
}

#[derive(Debug)]
enum SessionState {
    Idle,
    Installed(RouteSet),
    Released,
}

pub struct TunnelRouter {
    config: ValidatedConfig,
    backend: Box<dyn RoutingBackend>,
    exec: Arc<dyn CommandExecutor>,
    /// Runs the read-only topology queries when set, `exec` otherwise
    probe: Option<Arc<dyn CommandExecutor>>,
    adapter_override: Option<String>,
    session_file: Option<PathBuf>,
    state: Mutex<SessionState>,
}

impl TunnelRouter {
    pub fn new(
        config: ValidatedConfig,
        platform: Platform,
        exec: Arc<dyn CommandExecutor>,
    ) -> Self {
        info!("Creating TunnelRouter for platform: {}", platform);
        Self {
            config,
            backend: backend_for(platform),
            exec,
            probe: None,
            adapter_override: None,
            session_file: None,
            state: Mutex::new(SessionState::Idle),
        }
    }

    /// Route exceptions through this adapter instead of probing for one
    pub fn with_adapter(mut self, adapter: Option<String>) -> Self {
        self.adapter_override = adapter;
        self
    }

    /// Query the default route and adapter through `probe`, leaving `exec`
    /// with the commands that change the host
    pub fn with_probe_executor(mut self, probe: Arc<dyn CommandExecutor>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Persist an installed override to `path` for crash recovery
    pub fn with_session_file(mut self, path: Option<PathBuf>) -> Self {
        self.session_file = path;
        self
    }

    pub fn platform(&self) -> Platform {
        self.backend.platform()
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn resolver(&self) -> AddressResolver<'_> {
        let exec = self.probe.as_ref().unwrap_or(&self.exec);
        AddressResolver::new(exec.as_ref(), self.platform())
            .with_adapter(self.adapter_override.clone())
    }

    /// Work out the route set for `interface` from the current topology
    pub fn plan(&self, interface: &str, steps: &mut StepRunner<'_>) -> RouteSet {
        let topology = Topology::discover(&self.resolver(), &self.config);
        let (routes, unavailable) =
            RouteSet::for_session(&self.config, interface, self.platform(), &topology);
        if let Some(reason) = unavailable {
            steps.skip("global override", &reason.to_string());
        }
        routes
    }

    /// Address the interface and, for global-mode clients, take over the
    /// default route. Call once, after the interface exists and before
    /// packets are forwarded.
    pub fn configure(&self, interface: &str) -> Result<RouteReport, RouterError> {
        if interface.trim().is_empty() {
            return Err(RouterError::NoInterface);
        }

        let mut state = self.lock();
        if !matches!(*state, SessionState::Idle) {
            return Err(RouterError::AlreadyConfigured(interface.to_string()));
        }

        info!("Configuring interface {} ({})", interface, self.platform());
        let mut steps = StepRunner::new(self.exec.as_ref());
        let routes = self.plan(interface, &mut steps);
        self.backend.configure(&self.config, &routes, &mut steps);

        let report = steps.finish();
        report.log_summary("configure");
        info!("Interface configured: {}", interface);

        self.write_session(&routes);
        *state = SessionState::Installed(routes);
        Ok(report)
    }

    /// Undo what `configure` recorded; a no-op before configure and after
    /// the first reset
    pub fn reset(&self) -> RouteReport {
        let mut state = self.lock();
        let routes = match std::mem::replace(&mut *state, SessionState::Released) {
            SessionState::Installed(routes) => routes,
            previous @ (SessionState::Idle | SessionState::Released) => {
                debug!("Reset requested with nothing installed");
                *state = previous;
                return RouteReport::default();
            }
        };

        let mut steps = StepRunner::new(self.exec.as_ref());
        if routes.has_override() {
            info!("Resetting routes for {}", routes.interface);
        }
        self.backend.reset(&self.config, &routes, &mut steps);
        self.clear_session();

        let report = steps.finish();
        if !report.steps.is_empty() {
            report.log_summary("reset");
        }
        report
    }

    /// Tear down an override left behind by a session that never reset
    ///
    /// Uses the session record when there is one. Otherwise the route set
    /// is re-derived from config and topology, with the gateway taken from
    /// config only: the host's current default may already be the tunnel.
    /// The router must not own a live session.
    pub fn recover(&self, interface: &str) -> Result<RouteReport, RouterError> {
        if interface.trim().is_empty() {
            return Err(RouterError::NoInterface);
        }
        let state = self.lock();
        if matches!(*state, SessionState::Installed(_)) {
            return Err(RouterError::AlreadyConfigured(interface.to_string()));
        }

        let mut steps = StepRunner::new(self.exec.as_ref());
        let routes = match self.recorded_session(interface) {
            Some(routes) => routes,
            None => self.plan_recovery(interface, &mut steps),
        };
        self.backend.reset(&self.config, &routes, &mut steps);
        self.clear_session();

        let report = steps.finish();
        report.log_summary("recover");
        Ok(report)
    }

    fn recorded_session(&self, interface: &str) -> Option<RouteSet> {
        let record = SessionRecord::find(self.session_file.as_ref()?)?;
        if record.platform != self.platform() {
            warn!(
                "Session record is for {}, not {}; ignoring it",
                record.platform,
                self.platform()
            );
            return None;
        }
        if record.interface != interface {
            warn!(
                "Session record names {} rather than {}; using the record",
                record.interface, interface
            );
        }
        info!("Recovering override recorded for {}", record.interface);
        Some(record.route_set())
    }

    fn plan_recovery(&self, interface: &str, steps: &mut StepRunner<'_>) -> RouteSet {
        let mut topology = Topology::discover(&self.resolver(), &self.config);
        if let Some(gateway) = topology.discovered_gateway.take() {
            warn!(
                "Not restoring the current default gateway {}, set local_gateway to recover",
                gateway
            );
        }
        let (routes, unavailable) =
            RouteSet::for_session(&self.config, interface, self.platform(), &topology);
        if let Some(reason) = unavailable {
            steps.skip("global override", &reason.to_string());
        }
        routes
    }

    fn write_session(&self, routes: &RouteSet) {
        let Some(path) = &self.session_file else {
            return;
        };
        if let Some(record) = SessionRecord::from_routes(self.platform(), routes) {
            if let Err(e) = record.save(path) {
                warn!("Failed to write session record {}: {}", path.display(), e);
            }
        }
    }

    fn clear_session(&self) {
        if let Some(path) = &self.session_file {
            SessionRecord::remove(path);
        }
    }

    /// Route set owned by the live session, if any
    pub fn installed(&self) -> Option<RouteSet> {
        match &*self.lock() {
            SessionState::Installed(routes) => Some(routes.clone()),
            SessionState::Idle | SessionState::Released => None,
        }
    }
}

impl Drop for TunnelRouter {
    fn drop(&mut self) {
        if matches!(*self.lock(), SessionState::Installed(_)) {
            debug!("TunnelRouter dropped with routes installed, resetting");
            self.reset();
        }
    }
}
