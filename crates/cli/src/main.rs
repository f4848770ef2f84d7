//! ysync: keep a local folder in sync with your YouLab workspace
//!
//! The daemon watches the configured folder for changes and uploads them,
//! while periodic full passes pull down anything changed on the server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{builder::Styles, Parser, Subcommand};
use color_eyre::eyre::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ysync_core::{config, Config, Daemon, DaemonOptions, SyncManager, WorkspaceTransport};
use ysync_transport::HttpTransport;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "ysync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Sync a local folder with your YouLab workspace")]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Workspace server URL
        #[arg(long, default_value = "http://localhost:8200")]
        server: String,

        /// API key for authentication
        #[arg(long)]
        api_key: Option<String>,

        /// Your workspace user ID
        #[arg(long)]
        user_id: Option<String>,

        /// Local folder to sync
        #[arg(long)]
        folder: Option<PathBuf>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Perform a one-time full sync and exit
    Sync,

    /// Watch the local folder and sync continuously
    Watch,

    /// Show connection status and workspace info
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);

    if let Commands::Init {
        server,
        api_key,
        user_id,
        folder,
        force,
    } = &cli.command
    {
        init_logging(cli.verbose, "info");
        return init_command(
            &config_path,
            server,
            api_key.as_deref(),
            user_id.as_deref(),
            folder.as_deref(),
            *force,
        );
    }

    let config = Config::load(&config_path)?;
    init_logging(cli.verbose, &config.logging.level);

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Sync => sync_command(&config).await,
        Commands::Watch => watch_command(&config).await,
        Commands::Status => status_command(&config).await,
    }
}

fn init_logging(verbose: bool, configured_level: &str) {
    let filter = if verbose { "debug" } else { configured_level };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

fn init_command(
    config_path: &std::path::Path,
    server: &str,
    api_key: Option<&str>,
    user_id: Option<&str>,
    folder: Option<&std::path::Path>,
    force: bool,
) -> Result<()> {
    if config_path.exists() && !force {
        bail!(
            "config file already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }

    let mut config = Config::default();
    config.server.url = server.to_string();
    if let Some(api_key) = api_key {
        config.server.api_key = api_key.to_string();
    }
    if let Some(user_id) = user_id {
        config.server.user_id = user_id.to_string();
    }
    if let Some(folder) = folder {
        config.sync.local_folder = std::path::absolute(folder)?;
    }

    config.save(config_path)?;

    info!("configuration created at {}", config_path.display());
    info!("next steps:");
    info!("  1. edit {} to set your server and credentials", config_path.display());
    info!("  2. run 'ysync watch' to start syncing");
    Ok(())
}

fn build_manager(config: &Config) -> Result<Arc<SyncManager>> {
    let transport = Arc::new(HttpTransport::new(
        &config.server.url,
        Some(config.server.api_key.clone()),
        config.server.user_id.clone(),
    )?);

    Ok(Arc::new(SyncManager::new(
        transport,
        &config.sync.local_folder,
        &config.ignore,
        config.server.user_id.clone(),
    )?))
}

async fn sync_command(config: &Config) -> Result<()> {
    config.validate()?;

    info!("starting one-time sync");
    info!("local folder: {}", config.sync.local_folder.display());
    info!("server: {}", config.server.url);

    let manager = build_manager(config)?;
    let cancel = CancellationToken::new();
    manager.full_sync(&cancel).await?;

    info!("sync completed successfully");
    Ok(())
}

async fn watch_command(config: &Config) -> Result<()> {
    config.validate()?;

    info!("starting ysync daemon");
    info!("local folder: {}", config.sync.local_folder.display());
    info!("server: {}", config.server.url);
    info!("user id: {}", mask(&config.server.user_id));

    let manager = build_manager(config)?;
    let daemon = Daemon::new(manager, DaemonOptions::from_config(config));

    let shutdown = daemon.shutdown_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });

    daemon.run().await?;
    info!("goodbye");
    Ok(())
}

async fn status_command(config: &Config) -> Result<()> {
    if config.server.url.is_empty() {
        bail!("server URL not configured");
    }

    println!("ysync status");
    println!("============");
    println!();
    println!("Server:       {}", config.server.url);
    println!("User ID:      {}", mask(&config.server.user_id));
    println!("Local folder: {}", config.sync.local_folder.display());
    println!();

    let transport = HttpTransport::new(
        &config.server.url,
        Some(config.server.api_key.clone()),
        config.server.user_id.clone(),
    )?;

    print!("Checking server connection... ");
    match tokio::time::timeout(Duration::from_secs(10), transport.ping()).await {
        Ok(Ok(())) => println!("OK"),
        Ok(Err(err)) => {
            println!("FAILED ({err})");
            return Ok(());
        }
        Err(_) => {
            println!("FAILED (timed out)");
            return Ok(());
        }
    }

    if !config.server.user_id.is_empty() {
        match transport.list_files().await {
            Ok(listing) => println!("Workspace files: {}", listing.files.len()),
            Err(err) => error!(%err, "failed to list workspace"),
        }
    }

    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Mask an identifier for display, keeping the first and last four chars
fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return value.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_short_values_unchanged() {
        assert_eq!(mask("u-1"), "u-1");
        assert_eq!(mask("12345678"), "12345678");
    }

    #[test]
    fn test_mask_long_values() {
        assert_eq!(mask("0123456789abcdef"), "0123...cdef");
    }

    #[test]
    fn test_mask_counts_chars_not_bytes() {
        assert_eq!(mask("héllo-world-42"), "héll...d-42");
        assert_eq!(mask("ユーザー"), "ユーザー");
    }
}
