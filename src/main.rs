use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rfm_sync::config::{ConnectionOverrides, ExcludeKind, DEFAULT_DEVICE};
use rfm_sync::format::ListingFormat;
use rfm_sync::paths::{
    absolute_path, absolute_path_string, clean_remote_path, remote_basename, DEFAULT_MOUNT,
    SYS_DIR,
};
use rfm_sync::{ops, Config, RemoteFileManager, RemoteFileService, RrfClient, SyncEngine, SyncOptions};

#[derive(Parser)]
#[command(name = "rfm")]
#[command(about = "Backup and file management for RepRapFirmware boards")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use this device from the config file
    #[arg(long, global = true, default_value = DEFAULT_DEVICE)]
    device: String,

    /// Domain or IP address of the board
    #[arg(long, global = true)]
    domain: Option<String>,

    /// HTTP port of the board
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Connection password
    #[arg(long, global = true)]
    password: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log details of the underlying HTTP requests
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Incrementally back up a remote directory to local disk
    Backup {
        /// Delete local files and managed directories that no longer exist remotely
        #[arg(long)]
        remove_local: bool,

        /// Exclude remote paths starting with this string (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Local target directory
        #[arg(default_value = ".")]
        local: String,

        /// Remote source directory
        #[arg(default_value = SYS_DIR)]
        remote: String,
    },

    /// Upload a file or directory tree
    Upload {
        /// Exclude local paths starting with this string (repeatable)
        #[arg(long)]
        exclude: Vec<String>,

        /// Local file or directory
        #[arg(default_value = ".")]
        local: String,

        /// Remote target directory
        #[arg(default_value = DEFAULT_MOUNT)]
        remote: String,
    },

    /// Download a single file
    Download {
        /// Remote file
        remote: String,

        /// Local file name (defaults to the remote file name)
        local: Option<String>,
    },

    /// List remote directories
    Ls {
        /// List recursively
        #[arg(short, long)]
        recursive: bool,

        /// Print sizes in human readable units
        #[arg(short = 'H', long)]
        human_readable: bool,

        /// Remote directories (defaults to the drive root)
        paths: Vec<String>,
    },

    /// Create a remote directory
    Mkdir {
        path: String,
    },

    /// Rename or move a file or directory within a drive
    Mv {
        /// Delete an existing target first
        #[arg(short, long)]
        force: bool,

        old: String,

        new: String,
    },

    /// Delete a remote file or directory
    Rm {
        /// Delete directories with all their contents
        #[arg(short, long)]
        recursive: bool,

        path: String,
    },

    /// Show size and modification time of a remote file
    Fileinfo {
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.debug)?;
    debug!("Starting rfm v{}", env!("CARGO_PKG_VERSION"));

    let config_path = match &cli.config {
        Some(path) => absolute_path(&path.to_string_lossy()),
        None => Config::default_config_path()?,
    };
    let mut config = Config::load_or_default(&config_path)?;

    let overrides = ConnectionOverrides {
        device: cli.device.clone(),
        domain: cli.domain.clone(),
        port: cli.port,
        password: cli.password.clone(),
    };
    let device = config.resolve_device(&overrides)?;

    // Exclude lists are part of the stored device settings
    let excludes = match &cli.command {
        Commands::Backup { exclude, .. } => {
            let mut excludes = device.resolve_excludes(ExcludeKind::Backup, exclude.clone());
            excludes.normalize_with(clean_remote_path);
            excludes
        }
        Commands::Upload { exclude, .. } => {
            let mut excludes = device.resolve_excludes(ExcludeKind::Upload, exclude.clone());
            excludes.normalize_with(absolute_path_string);
            excludes
        }
        _ => Default::default(),
    };
    let device = device.clone();

    let client = RrfClient::new(&device.domain, device.port)?;
    if let Err(e) = client.connect(&device.password).await {
        warn!("Device {} not available: {}", device.domain, e);
        return Ok(());
    }
    debug!("Connected to {}", client.base_url());

    if let Err(e) = config.save(&config_path) {
        warn!(
            "Unable to save configuration for {} to {:?}: {:#}",
            cli.device, config_path, e
        );
    }

    let result = match cli.command {
        Commands::Backup {
            remove_local,
            local,
            remote,
            ..
        } => {
            let options = SyncOptions {
                excludes,
                prune: remove_local,
                ..Default::default()
            };
            cmd_backup(&client, options, &remote, &local).await
        }
        Commands::Upload { local, remote, .. } => {
            cmd_upload(&client, &local, &remote, &excludes).await
        }
        Commands::Download { remote, local } => cmd_download(&client, &remote, local).await,
        Commands::Ls {
            recursive,
            human_readable,
            paths,
        } => cmd_ls(&client, paths, recursive, human_readable).await,
        Commands::Mkdir { path } => cmd_mkdir(&client, &path).await,
        Commands::Mv { force, old, new } => cmd_mv(&client, &old, &new, force).await,
        Commands::Rm { recursive, path } => cmd_rm(&client, &path, recursive).await,
        Commands::Fileinfo { path } => cmd_fileinfo(&client, &path).await,
    };

    if let Err(e) = client.disconnect().await {
        debug!("Disconnect failed: {}", e);
    }

    result
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool, debug: bool) -> Result<()> {
    let default_level = if debug {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Wait for SIGINT or SIGTERM and cancel the running operation
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, stopping after the current file"),
        _ = terminate => info!("Received SIGTERM, stopping after the current file"),
    }

    token.cancel();
}

/// Mirror a remote directory into a local one
async fn cmd_backup(client: &RrfClient, options: SyncOptions, remote: &str, local: &str) -> Result<()> {
    let remote = clean_remote_path(remote);
    let local = absolute_path(local);

    let token = CancellationToken::new();
    let signal_task = tokio::spawn(shutdown_signal(token.clone()));

    let engine = SyncEngine::new(client, options).with_cancellation(token);
    let result = engine.sync(&remote, &local).await;
    signal_task.abort();

    let summary =
        result.with_context(|| format!("Backup of {} to {} failed", remote, local.display()))?;

    println!("Backup of {} complete", remote);
    println!("   Directories: {}", summary.directories);
    println!("   Added: {}", summary.added);
    println!("   Updated: {}", summary.updated);
    println!("   Up to date: {}", summary.up_to_date);
    println!("   Excluded: {}", summary.excluded);
    println!("   Removed: {}", summary.removed);
    println!("   Downloaded: {} bytes", summary.bytes_downloaded);
    println!("   Duration: {:.2}s", summary.duration.as_secs_f64());

    Ok(())
}

async fn cmd_upload(
    client: &RrfClient,
    local: &str,
    remote: &str,
    excludes: &rfm_sync::Excludes,
) -> Result<()> {
    let local = absolute_path(local);
    let remote = clean_remote_path(remote);
    ops::upload_tree(client, &local, &remote, excludes).await?;
    Ok(())
}

async fn cmd_download(client: &RrfClient, remote: &str, local: Option<String>) -> Result<()> {
    let remote = clean_remote_path(remote);
    let local = local.unwrap_or_else(|| remote_basename(&remote).to_string());
    ops::download_file(client, &remote, &absolute_path(&local)).await?;
    Ok(())
}

/// Print listings of remote directories
async fn cmd_ls(
    client: &RrfClient,
    paths: Vec<String>,
    recursive: bool,
    human_readable: bool,
) -> Result<()> {
    let paths: Vec<String> = if paths.is_empty() {
        vec![DEFAULT_MOUNT.to_string()]
    } else {
        paths.iter().map(|p| clean_remote_path(p)).collect()
    };
    let format = ListingFormat { human_readable };
    let with_headers = recursive || paths.len() > 1;

    for path in &paths {
        if with_headers {
            print!("\n{}:\n", path);
        }
        let list = client
            .list_directory(path, recursive)
            .await
            .with_context(|| format!("Failed to list {}", path))?;
        if recursive {
            print!("{}", format.render_tree(&list));
        } else {
            print!("{}", format.render(&list));
        }
    }

    Ok(())
}

async fn cmd_mkdir(client: &RrfClient, path: &str) -> Result<()> {
    let path = clean_remote_path(path);
    client
        .mkdir(&path)
        .await
        .with_context(|| format!("Failed to create {}", path))
}

async fn cmd_mv(client: &RrfClient, old: &str, new: &str, force: bool) -> Result<()> {
    ops::move_entry(client, &clean_remote_path(old), &clean_remote_path(new), force).await
}

async fn cmd_rm(client: &RrfClient, path: &str, recursive: bool) -> Result<()> {
    ops::remove(client, &clean_remote_path(path), recursive).await
}

async fn cmd_fileinfo(client: &RrfClient, path: &str) -> Result<()> {
    let path = clean_remote_path(path);
    let info = client
        .fileinfo(&path)
        .await
        .with_context(|| format!("Failed to get file info for {}", path))?;

    println!("{}", path);
    println!("   Size: {} bytes", info.size);
    if let Some(modified) = info.last_modified {
        println!(
            "   Modified: {}",
            modified
                .with_timezone(&chrono::Local)
                .format(rfm_sync::rrf::TIME_FORMAT)
        );
    }

    Ok(())
}
