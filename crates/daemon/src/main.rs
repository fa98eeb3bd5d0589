//! jailserve
//!
//! Serves one directory tree over HTTP from inside a chroot, with all
//! capabilities dropped.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use jailserve::config::{default_config_path, Config};
use jailserve::privilege::{Elevated, SystemReducer};
use jailserve::router::ServeConfig;
use jailserve::server;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// jailserve - confined static file server with optional uploads.
#[derive(Parser, Debug)]
#[command(name = "jailserve")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Accept single-file uploads via POST
    #[arg(long)]
    pub allow_uploads: bool,

    /// Port to listen on [default: 8000]
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind to [default: 0.0.0.0]
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<IpAddr>,

    /// Directory to serve [default: current directory]
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Flags take precedence over the file and the environment.
    fn apply_overrides(&self, config: &mut Config) {
        if self.allow_uploads {
            config.server.allow_uploads = true;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = self.bind {
            config.server.bind_address = bind.to_string();
        }
        if let Some(root) = &self.root {
            config.server.root = Some(root.clone());
        }
        if self.verbose {
            config.daemon.log_level = "debug".to_string();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    let env_overrides = config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config)?;
    tracing::info!("jailserve starting...");
    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "Loaded configuration file");
    } else {
        tracing::debug!(path = %config_path.display(), "No configuration file, using defaults");
    }
    for note in &env_overrides {
        note.log();
    }
    tracing::debug!(?config, "Effective configuration");

    run(config)
}

/// Initialize tracing. `RUST_LOG` wins over the configured level.
fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.daemon.log_level.to_lowercase()))
        .context("Invalid log filter")?;

    match &config.daemon.log_file {
        // Opened now, before root confinement hides the path.
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(file_name.to_string_lossy().into_owned())
                .build(dir.unwrap_or_else(|| Path::new(".")))
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(appender)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

/// Bind, reduce privileges, then start the runtime and serve.
///
/// Everything up to the reduction runs on the main thread, before any
/// runtime worker exists, so the capability drop covers every thread.
fn run(config: Config) -> anyhow::Result<()> {
    let root = match &config.server.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("Failed to determine working directory")?,
    };
    let elevated = Elevated::new(&root)
        .with_context(|| format!("Cannot serve {}", root.display()))?;
    tracing::info!(root = %elevated.root().display(), "Serving directory");

    let ip: IpAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.server.bind_address))?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = server::bind(addr).with_context(|| format!("Failed to bind {addr}"))?;

    let reduced = elevated
        .reduce(&SystemReducer::default(), config.security.root_confinement)
        .context("Privilege reduction failed")?;

    let serve_config = ServeConfig::new(
        &reduced,
        config.server.allow_uploads,
        config.upload.max_body_bytes,
    );
    if serve_config.allow_uploads() {
        tracing::info!(max_body_bytes = serve_config.max_upload_bytes(), "Uploads enabled");
    }
    let app = jailserve::build_app(serve_config).context("Failed to build application")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime
        .block_on(server::serve(listener, app, wait_for_shutdown_signal()))
        .context("Server error")?;

    tracing::info!("jailserve stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to register signal handlers; falling back to Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
}

/// Wait for a shutdown signal (Ctrl-C).
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl-C");
    }
}
