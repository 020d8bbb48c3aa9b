//! embark: serve web applications from a declarative configuration.
//!
//! Loads the TOML configuration, initializes tracing, registers the configured
//! applications and runs the server until it is stopped.

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use embark::config::{AppKind, ConfigFile, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};
use embark::{Bootstrap, Lifecycle};

/// embark: an embedded HTTP/HTTPS server for web applications
#[derive(Parser, Debug)]
#[command(name = "embark", version, about)]
struct Args {
    /// Path to configuration file (defaults to config/embark.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level filter (e.g., "embark=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Packaged application (tar archive) to serve at /
    #[arg(long, conflicts_with = "dir")]
    war: Option<PathBuf>,

    /// Application directory to serve at /
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Stop right after a successful start (configuration smoke check)
    #[arg(long)]
    no_join: bool,
}

fn load_config(path: Option<&Path>) -> Result<ConfigFile, embark::config::ConfigError> {
    match path {
        Some(path) => ConfigFile::load(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => ConfigFile::load(DEFAULT_CONFIG_PATH),
        None => Ok(ConfigFile::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    // Priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(
        host = %config.server.host,
        connectors = ?config.server.connectors,
        apps = config.app.len(),
        "Loaded configuration"
    );

    let stop_at_shutdown = config.server.stop_at_shutdown;
    let mut bootstrap = Bootstrap::new(config.server);

    if let Some(war) = args.war {
        bootstrap.add_war_app(war, "/")?;
    } else if let Some(dir) = args.dir {
        bootstrap.add_exploded_war_app(dir, None, "/")?;
    }

    for app in config.app {
        match app.kind {
            AppKind::Archive => bootstrap.add_war_app(app.path, &app.context_path)?,
            AppKind::Exploded => {
                bootstrap.add_exploded_war_app(app.path, app.descriptor, &app.context_path)?
            }
        }
    }

    if stop_at_shutdown {
        bootstrap.install_shutdown_hook();
    }

    bootstrap.start_with_join(args.no_join.then_some(false))?;
    // Already stopped when the shutdown hook ended the join.
    if bootstrap.state() == Lifecycle::Started {
        bootstrap.stop()?;
    }

    Ok(())
}
