//! Rust Ident Responder - Main binary

use clap::{Parser, Subcommand};
use rustidentd_core::{
    Config, ConnectionRegistry, IdentdManager, IdentdModule, IdentdServer, ModuleManager,
    NoConnections, OsSystemInfo, RegistryKind, RehashService, SocketTableRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Rust Ident Responder - answers RFC 1413 ident queries
#[derive(Parser)]
#[command(name = "rustidentd")]
#[command(about = "An RFC 1413 ident responder for IRC clients")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "identd.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "identd.toml")]
        output: PathBuf,
    },
    /// Show responder information
    Info,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if let Some(command) = cli.command {
        match command {
            Commands::Config { output } => {
                generate_config(&output)?;
                return Ok(());
            }
            Commands::Info => {
                show_info();
                return Ok(());
            }
            Commands::Version => {
                show_version();
                return Ok(());
            }
        }
    }

    let config = if cli.config.exists() {
        info!("Loading configuration from {:?}", cli.config);
        Config::from_file(&cli.config)?
    } else {
        info!("Configuration file not found, using defaults");
        Config::default()
    };

    config.validate()?;
    if cli.test_config {
        info!("Configuration is valid");
        return Ok(());
    }

    run(config, cli.config).await
}

async fn run(config: Config, config_path: PathBuf) -> anyhow::Result<()> {
    let registry: Arc<dyn ConnectionRegistry> = match config.server.registry {
        RegistryKind::SocketTable => Arc::new(SocketTableRegistry),
        RegistryKind::None => Arc::new(NoConnections),
    };
    let config = config.into_shared();

    let server = Arc::new(IdentdServer::new(
        config.clone(),
        registry,
        Arc::new(OsSystemInfo),
    ));
    let manager = Arc::new(IdentdManager::new(config.clone(), server.clone()));
    let (events, _) = broadcast::channel(64);

    let mut modules = ModuleManager::new();
    modules
        .load_module(Box::new(IdentdModule::new(manager, events)))
        .await?;

    // A standalone daemon has no connection attempts to wait for
    server.start_server().await?;
    info!("Starting Rust Ident Responder...");

    let rehash = RehashService::new(config, &config_path);
    wait_for_shutdown(&rehash).await;

    info!("Shutting down");
    modules.unload_all().await?;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(rehash: &RehashService) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Unable to listen for SIGHUP, rehash disabled: {}", e);
            wait_for_ctrl_c().await;
            return;
        }
    };

    let ctrl_c = wait_for_ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return,
            _ = hangup.recv() => {
                if let Err(e) = rehash.reload().await {
                    error!("Rehash of {:?} failed: {}", rehash.config_path(), e);
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_rehash: &RehashService) {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {}", e);
    }
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();

    Ok(())
}

/// Generate default configuration file
fn generate_config(output: &Path) -> anyhow::Result<()> {
    let config = Config::default();
    config.to_file(output)?;
    println!("Generated default configuration file: {:?}", output);
    Ok(())
}

/// Show responder information
fn show_info() {
    println!("Rust Ident Responder");
    println!("====================");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Description: {}", env!("CARGO_PKG_DESCRIPTION"));
    println!("Repository: {}", env!("CARGO_PKG_REPOSITORY"));
    println!("License: {}", env!("CARGO_PKG_LICENSE"));
    println!();
    println!("Features:");
    println!("  - RFC 1413 ident replies");
    println!("  - NO-USER / HIDDEN-USER privacy modes");
    println!("  - Custom user and system names");
    println!("  - Socket table owner lookup");
    println!("  - Configuration reload on SIGHUP");
}

/// Show version information
fn show_version() {
    println!("rustidentd {}", env!("CARGO_PKG_VERSION"));
}
