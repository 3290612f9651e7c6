use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tunroute::device::TunDevice;
use tokio::signal;
use tunroute::exec::{RecordingExecutor, SystemExecutor};
use tunroute::vpn::SessionRecord;
use tunroute::{platform_of, Platform, RouteReport, TunnelConfig, TunnelRouter, ValidatedConfig};

#[derive(Parser)]
#[command(name = "tunroute")]
#[command(about = "Tunnel interface addressing and global-mode route override")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ./tunroute.toml, then ~/.tunroute/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the tunnel interface and routes, reset them on Ctrl+C or SIGTERM
    Up {
        /// Use an existing interface instead of creating one
        #[arg(short, long)]
        interface: Option<String>,
        /// Physical adapter for the exception routes (detected if omitted)
        #[arg(short, long)]
        adapter: Option<String>,
    },
    /// Remove a global-mode override left behind by an unclean exit
    Down {
        #[arg(short, long)]
        interface: String,
        #[arg(short, long)]
        adapter: Option<String>,
    },
    /// Print the commands `up` would run; only the default route is read
    Plan {
        #[arg(short, long, default_value = "tun0")]
        interface: String,
        #[arg(short, long)]
        adapter: Option<String>,
        /// Target platform: linux, darwin or windows (default: this host)
        #[arg(short, long)]
        platform: Option<String>,
        /// Print the step reports as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so `plan` output stays clean on stdout
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Up { interface, adapter } => {
            let config = load_validated(cli.config.as_ref());
            check_privileges();
            let mut shutdown = ShutdownSignals::register()?;
            let platform = Platform::current();
            let exec = Arc::new(SystemExecutor::with_timeout(config.config().command_timeout()));

            // Device (if we own it) must outlive the router so reset runs first
            let (device, name) = match interface {
                Some(name) => (None, name),
                None => {
                    let device = TunDevice::create(&config, platform)?;
                    let name = device.name().to_string();
                    (Some(device), name)
                }
            };

            let router = TunnelRouter::new(config, platform, exec)
                .with_adapter(adapter)
                .with_session_file(SessionRecord::default_path());
            let report = router.configure(&name)?;
            print_failures(&report);

            info!("Tunnel interface {} ready, press Ctrl+C to disconnect", name);
            shutdown.wait().await?;
            info!("Disconnecting...");

            let report = router.reset();
            print_failures(&report);
            drop(router);
            drop(device);
        }
        Commands::Down { interface, adapter } => {
            let config = load_validated(cli.config.as_ref());
            check_privileges();
            let exec = Arc::new(SystemExecutor::with_timeout(config.config().command_timeout()));
            let router = TunnelRouter::new(config, Platform::current(), exec)
                .with_adapter(adapter)
                .with_session_file(SessionRecord::default_path());
            let report = router.recover(&interface)?;
            print_failures(&report);
            println!("Reset {} route commands for {}", report.applied(), interface);
        }
        Commands::Plan {
            interface,
            adapter,
            platform,
            json,
        } => {
            let config = load_validated(cli.config.as_ref());
            let platform = platform.as_deref().map(platform_of).unwrap_or_else(Platform::current);
            let timeout = config.config().command_timeout();
            let exec = Arc::new(RecordingExecutor::new());
            let mut router = TunnelRouter::new(config, platform, exec).with_adapter(adapter);
            // The host's routing table only describes the host's own platform
            if platform == Platform::current() {
                let probe = Arc::new(SystemExecutor::with_timeout(timeout));
                router = router.with_probe_executor(probe);
            }

            let configure = router.configure(&interface)?;
            let reset = router.reset();

            if json {
                let out = serde_json::json!({
                    "platform": platform,
                    "interface": interface,
                    "configure": configure,
                    "reset": reset,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("# configure ({})", platform);
                print_plan(&configure);
                println!("# reset ({})", platform);
                print_plan(&reset);
            }
        }
        Commands::Init => {
            info!("Generating default config...");
            let config = TunnelConfig::default();
            let path = cli.config.unwrap_or_else(|| PathBuf::from("tunroute.toml"));
            config.save(&path)?;
            println!("Created default config: {}", path.display());
        }
    }

    Ok(())
}

/// Load and validate the config; an invalid config is fatal
fn load_validated(path: Option<&PathBuf>) -> ValidatedConfig {
    let loaded = match path {
        Some(path) => TunnelConfig::load(path),
        None => TunnelConfig::discover(),
    };
    match loaded.and_then(|config| config.validate()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

/// SIGINT and SIGTERM (Ctrl+C off unix), registered before configure
struct ShutdownSignals {
    #[cfg(unix)]
    sigterm: signal::unix::Signal,
    #[cfg(unix)]
    sigint: signal::unix::Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    fn register() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal::unix::signal(signal::unix::SignalKind::terminate())?,
            sigint: signal::unix::signal(signal::unix::SignalKind::interrupt())?,
        })
    }

    #[cfg(not(unix))]
    fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.sigterm.recv() => {
                    info!("Received SIGTERM");
                }
                _ = self.sigint.recv() => {
                    info!("Received SIGINT");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C");
        }

        Ok(())
    }
}

#[cfg(unix)]
fn check_privileges() {
    if !nix::unistd::geteuid().is_root() {
        warn!("Not running as root, interface and route commands will likely fail");
    }
}

#[cfg(not(unix))]
fn check_privileges() {}

fn print_failures(report: &RouteReport) {
    for step in report.failures() {
        let command = step.command.as_ref().map(ToString::to_string).unwrap_or_default();
        eprintln!("failed: {} ({})", step.step, command);
    }
}

fn print_plan(report: &RouteReport) {
    for step in &report.steps {
        match &step.command {
            Some(command) => println!("{}", command),
            None => println!("# skipped {}: {:?}", step.step, step.outcome),
        }
    }
}
