//! Pagekeep
//!
//! Safe-path file operations for a browser page editor.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use daemon::config::{default_config_path, Config};
use daemon::ipc::{get_socket_path, IpcClient, IpcServer};
use daemon::router::MessageRouter;
use protocol::messages::{
    CheckExtensionRequest, DeleteRequest, RenameRequest, SaveRequest, SaveReusableRequest,
    ScanRequest, UploadCancel, UploadChunk, UploadComplete, UploadStart,
};
use protocol::Message;
use tracing_subscriber::EnvFilter;

/// Default chunk size for `pagekeep upload`.
const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// How often `serve` sweeps abandoned uploads.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Pagekeep - safe-path file operations for a browser page editor.
#[derive(Parser, Debug)]
#[command(name = "pagekeep")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Site root, overriding the configuration
    #[arg(short, long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Send the request to a running `pagekeep serve` instead of acting locally
    #[arg(long, global = true)]
    pub remote: bool,

    /// Socket path for `serve` and `--remote`
    #[arg(long, global = true, value_name = "PATH")]
    pub socket: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Answer requests on a Unix socket
    Serve,

    /// Save a page
    Save {
        /// Page path relative to the site root
        file: String,

        /// Page content; read from stdin when neither this nor --template is given
        #[arg(long, conflicts_with = "input")]
        html: Option<String>,

        /// Read page content from a local file
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Start from an existing page inside the site root
        #[arg(long)]
        template: Option<String>,
    },

    /// Save a reusable element as <KIND>/<NAME>
    Reusable {
        kind: String,
        name: String,

        /// Element content; read from stdin when omitted
        #[arg(long)]
        html: Option<String>,
    },

    /// Rename a page
    Rename { file: String, new_file: String },

    /// Delete a page
    Delete { file: String },

    /// List editable pages
    Pages,

    /// Print the media tree of a directory
    Scan {
        /// Directory relative to the site root (defaults to the media directory)
        media_path: Option<String>,
    },

    /// Upload a local file into the media tree
    Upload {
        /// Local file to upload
        source: PathBuf,

        /// Destination directory relative to the site root
        #[arg(long, short)]
        media_path: Option<String>,

        /// Destination filename (defaults to the source's name)
        #[arg(long, short)]
        name: Option<String>,

        /// Report only the filename as the location
        #[arg(long)]
        only_filename: bool,

        /// Bytes per chunk
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
    },

    /// Check whether a filename would be accepted for upload
    CheckExtension { filename: String },

    /// Show or create the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Subcommands for configuration management.
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Print the configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

/// Where requests go: an in-process router or a running server.
enum Backend {
    Local(MessageRouter),
    Remote(IpcClient),
}

impl Backend {
    async fn request(&mut self, message: Message) -> anyhow::Result<Message> {
        match self {
            Backend::Local(router) => match router.route(message).await {
                Ok(Some(response)) => Ok(response),
                Ok(None) => anyhow::bail!("request produced no response"),
                Err(e) => Ok(Message::Error(e.to_error_message(None))),
            },
            Backend::Remote(client) => Ok(client.request(message).await?),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;

    init_tracing(cli.verbose, &config.daemon.log_level);
    tracing::debug!("Using config file: {:?}", config_path);

    config.apply_env_overrides();
    if let Some(root) = &cli.root {
        config.daemon.root = root.clone();
    }

    let socket_path = cli.socket.clone().unwrap_or_else(get_socket_path);

    let message = match cli.command {
        Commands::Serve => return serve(&config, &socket_path).await,
        Commands::Config(cmd) => return run_config_command(cmd, &config, &config_path),
        Commands::Upload {
            source,
            media_path,
            name,
            only_filename,
            chunk_size,
        } => {
            let mut backend = connect(cli.remote, &config, &socket_path).await?;
            let response = upload_file(
                &mut backend,
                &source,
                media_path,
                name,
                only_filename,
                chunk_size,
            )
            .await?;
            return print_response(&response);
        }
        Commands::Save {
            file,
            html,
            input,
            template,
        } => {
            let html = match (html, &input, &template) {
                (Some(html), _, _) => Some(html),
                (None, Some(input), _) => Some(
                    std::fs::read_to_string(input)
                        .with_context(|| format!("Failed to read {}", input.display()))?,
                ),
                (None, None, Some(_)) => None,
                (None, None, None) => Some(read_stdin()?),
            };
            Message::Save(SaveRequest {
                file,
                html,
                start_template_url: template,
            })
        }
        Commands::Reusable { kind, name, html } => {
            let html = match html {
                Some(html) => html,
                None => read_stdin()?,
            };
            Message::SaveReusable(SaveReusableRequest { kind, name, html })
        }
        Commands::Rename { file, new_file } => Message::Rename(RenameRequest { file, new_file }),
        Commands::Delete { file } => Message::Delete(DeleteRequest { file }),
        Commands::Pages => Message::ListPages,
        Commands::Scan { media_path } => Message::Scan(ScanRequest { media_path }),
        Commands::CheckExtension { filename } => {
            Message::CheckExtension(CheckExtensionRequest { filename })
        }
    };

    let mut backend = connect(cli.remote, &config, &socket_path).await?;
    let response = backend.request(message).await?;
    print_response(&response)
}

/// Initialize tracing; `RUST_LOG` wins over `--verbose`, which wins over
/// the configured level.
fn init_tracing(verbose: bool, configured: &str) {
    let level = if verbose { "debug" } else { configured };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(remote: bool, config: &Config, socket_path: &Path) -> anyhow::Result<Backend> {
    if remote {
        let client = IpcClient::connect(socket_path).await.with_context(|| {
            format!(
                "Failed to connect to {} (is `pagekeep serve` running?)",
                socket_path.display()
            )
        })?;
        Ok(Backend::Remote(client))
    } else {
        Ok(Backend::Local(MessageRouter::from_config(config)?))
    }
}

fn read_stdin() -> anyhow::Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("Failed to read content from stdin")?;
    Ok(buf)
}

/// Print a response as JSON. Error responses go to stderr and fail the
/// process.
fn print_response(response: &Message) -> anyhow::Result<()> {
    match response {
        Message::Error(err) => {
            eprintln!("{}", serde_json::to_string_pretty(err)?);
            std::process::exit(1);
        }
        other => {
            println!("{}", serde_json::to_string_pretty(other)?);
            Ok(())
        }
    }
}

/// Stream a local file through the chunked upload flow.
async fn upload_file(
    backend: &mut Backend,
    source: &Path,
    media_path: Option<String>,
    name: Option<String>,
    only_filename: bool,
    chunk_size: usize,
) -> anyhow::Result<Message> {
    if chunk_size == 0 {
        anyhow::bail!("--chunk-size must be greater than 0");
    }

    let filename = match name {
        Some(name) => name,
        None => source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", source.display()))?,
    };
    let data =
        std::fs::read(source).with_context(|| format!("Failed to read {}", source.display()))?;

    let started = backend
        .request(Message::UploadStart(UploadStart {
            media_path,
            filename,
            only_filename,
        }))
        .await?;
    let upload_id = match started {
        Message::UploadStarted(started) => {
            tracing::info!("Uploading to {}", started.destination);
            started.upload_id
        }
        other => return Ok(other),
    };

    let mut offset = 0u64;
    for chunk in data.chunks(chunk_size) {
        let progress = backend
            .request(Message::UploadChunk(UploadChunk {
                upload_id: upload_id.clone(),
                offset,
                data: chunk.to_vec(),
            }))
            .await?;
        match progress {
            Message::UploadProgress(progress) => offset = progress.received,
            other => {
                // Best effort; the server drops the session on most errors
                let _ = backend
                    .request(Message::UploadCancel(UploadCancel {
                        upload_id: upload_id.clone(),
                    }))
                    .await;
                return Ok(other);
            }
        }
    }

    backend
        .request(Message::UploadComplete(UploadComplete { upload_id }))
        .await
}

fn run_config_command(cmd: ConfigCommands, config: &Config, path: &Path) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show => {
            print!("{}", config.to_toml()?);
        }
        ConfigCommands::Path => {
            println!("{}", path.display());
        }
        ConfigCommands::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save(path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

/// Answer requests on the socket until SIGINT or SIGTERM.
async fn serve(config: &Config, socket_path: &Path) -> anyhow::Result<()> {
    let router = MessageRouter::from_config(config)?;
    tracing::info!(
        "Serving site root {}",
        router.services().root().path().display()
    );

    let server = IpcServer::bind(socket_path)
        .await
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;

    let services = router.services().clone();
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let services = services.clone();
            match tokio::task::spawn_blocking(move || services.sweep_stale_uploads()).await {
                Ok(Ok(0)) => {}
                Ok(Ok(removed)) => tracing::info!("Removed {} stale upload(s)", removed),
                Ok(Err(e)) => tracing::warn!("Stale upload sweep failed: {}", e),
                Err(e) => tracing::warn!("Stale upload sweep panicked: {}", e),
            }
        }
    });

    let result = tokio::select! {
        result = server.serve(router) => result.context("Socket server stopped"),
        signal = wait_for_shutdown_signal() => signal.context("Failed to wait for shutdown signal"),
    };

    sweeper.abort();
    if let Err(e) = std::fs::remove_file(socket_path) {
        tracing::debug!("Could not remove socket {}: {}", socket_path.display(), e);
    }
    tracing::info!("Stopped");
    result
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}
