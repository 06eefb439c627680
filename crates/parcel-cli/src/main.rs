//! `parcel` - command-line interface for a parcel-net file-sharing node.

mod config;
mod identity_store;
mod progress;

use clap::{Parser, Subcommand};
use config::Config;
use parcel_core::{Identity, Node, NodeConfig};
use parcel_discovery::{PeerId, SharedFile};
use progress::{format_bytes, format_eta, format_speed, TransferProgress};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// parcel - peer-to-peer file sharing: direct transfer, relay fallback,
/// flooded search and PIN rendezvous.
#[derive(Parser)]
#[command(name = "parcel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose (debug) logging, overriding the configured filter.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new identity and save its encrypted seed.
    Keygen {
        /// Where to write the encrypted seed (defaults to the configured key file).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Overwrite an existing key file.
        #[arg(long)]
        force: bool,
    },

    /// Run a long-lived node: serves configured shares and stays reachable
    /// for transfers, search, and PIN rendezvous until interrupted.
    Daemon,

    /// Add a directory to the set of shared directories.
    Share {
        /// Directory to share.
        directory: PathBuf,
    },

    /// Remove a directory from the set of shared directories.
    Unshare {
        /// Directory to stop sharing.
        directory: PathBuf,
    },

    /// Search known peers for files matching a query.
    Search {
        /// Substring to match against shared file names.
        query: String,
    },

    /// List peers discovered over LAN gossip.
    Peers {
        /// Seconds to listen for peer announcements before printing.
        #[arg(long, default_value_t = 5)]
        wait: u64,
    },

    /// PIN rendezvous: offer or redeem a short-code file reference.
    Pin {
        #[command(subcommand)]
        action: PinAction,
    },

    /// Fetch a signed preview of a PIN-referenced file without downloading it.
    Preview {
        /// PIN the file was offered under.
        pin: u32,
        /// MIME type to request the preview as, e.g. `image/jpeg`, `text/plain`.
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        /// Where to save preview content (thumbnails/snippets). Printed if omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show this node's identity and effective configuration.
    Status,

    /// Run the stateless HTTP relay server: chunk upload/download,
    /// peer registry, file search index and PIN rendezvous.
    RelayServe {
        /// Address to bind the relay's HTTP listener to.
        #[arg(long, default_value = "0.0.0.0:8421")]
        bind: std::net::SocketAddr,
        /// Directory relay uploads are stored under.
        #[arg(long)]
        storage_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum PinAction {
    /// Share a file and announce it under a freshly generated PIN.
    Offer {
        /// File to offer.
        file: PathBuf,
    },
    /// Resolve a PIN and download the file it refers to.
    Get {
        /// PIN to redeem.
        pin: u32,
        /// Directory to save the downloaded file in.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::load_or_default()?
    };
    config.validate()?;

    let filter = if cli.verbose { "debug".to_string() } else { config.logging.filter.clone() };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Keygen { output, force } => keygen(&config, output, force)?,
        Commands::Daemon => run_daemon(&config, &config_path).await?,
        Commands::Share { directory } => share(&config, &config_path, directory)?,
        Commands::Unshare { directory } => unshare(&config, &config_path, directory)?,
        Commands::Search { query } => search(&config, query).await?,
        Commands::Peers { wait } => list_peers(&config, wait).await?,
        Commands::Pin { action } => match action {
            PinAction::Offer { file } => pin_offer(&config, file).await?,
            PinAction::Get { pin, output } => pin_get(&config, pin, output).await?,
        },
        Commands::Preview { pin, mime, output } => preview(&config, pin, mime, output).await?,
        Commands::Status => status(&config)?,
        Commands::RelayServe { bind, storage_dir } => relay_serve(bind, storage_dir).await?,
    }

    Ok(())
}

fn keygen(config: &Config, output: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let key_file = output.unwrap_or_else(|| config.identity.key_file.clone());
    if key_file.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", key_file.display());
    }

    let identity = Identity::generate()?;
    let seed = identity.signing_key().to_bytes();

    let passphrase = rpassword::prompt_password("New identity passphrase: ")?;
    let confirm = rpassword::prompt_password("Confirm passphrase: ")?;
    if passphrase != confirm {
        anyhow::bail!("passphrases did not match");
    }

    identity_store::save(&key_file, &seed, &passphrase)?;

    println!("Peer id:    {}", identity.peer_id());
    println!("Public key: {}", hex::encode(identity.public_key_bytes()));
    println!("Saved encrypted identity to {}", key_file.display());
    Ok(())
}

fn load_identity(config: &Config) -> anyhow::Result<Arc<Identity>> {
    let key_file = &config.identity.key_file;
    if !key_file.exists() {
        anyhow::bail!(
            "no identity found at {}; run `parcel keygen` first",
            key_file.display()
        );
    }
    let passphrase = rpassword::prompt_password("Identity passphrase: ")?;
    let seed = identity_store::load(key_file, &passphrase)?;
    Ok(Arc::new(Identity::from_seed(&seed)?))
}

async fn start_node(config: &Config) -> anyhow::Result<Arc<Node>> {
    let identity = load_identity(config)?;
    let node_config: NodeConfig = config.to_node_config();
    let node = Node::new(node_config, identity).await?;
    node.run().await?;
    Ok(node)
}

fn share_directory_files(directory: &Path, owner: &PeerId) -> anyhow::Result<Vec<SharedFile>> {
    let mut files = Vec::new();
    collect_files(directory, owner, &mut files)?;
    Ok(files)
}

fn collect_files(directory: &Path, owner: &PeerId, out: &mut Vec<SharedFile>) -> anyhow::Result<()> {
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, owner, out)?;
            continue;
        }
        let data = std::fs::read(&path)?;
        let file_hash = parcel_crypto::hash::hash(&data);
        let logical_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed")
            .to_string();
        out.push(SharedFile {
            local_path: path,
            logical_name,
            size: data.len() as u64,
            file_hash,
            owner_peer_id: owner.clone(),
        });
    }
    Ok(())
}

async fn run_daemon(config: &Config, _config_path: &Path) -> anyhow::Result<()> {
    let node = start_node(config).await?;
    println!("Peer id:    {}", node.identity().peer_id());
    println!("Listening:  {}", node.listen_addr());

    for dir in &config.shares {
        let files = share_directory_files(dir, node.identity().peer_id())?;
        println!("Sharing {} ({} files)", dir.display(), files.len());
        node.share_directory(dir.clone(), files);
    }

    println!("\nRunning. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    Ok(())
}

fn share(config: &Config, config_path: &Path, directory: PathBuf) -> anyhow::Result<()> {
    let directory = directory.canonicalize()?;
    let mut config = config.clone();
    if !config.shares.contains(&directory) {
        config.shares.push(directory.clone());
        config.save(config_path)?;
    }
    println!("Sharing {} (takes effect next time `parcel daemon` starts)", directory.display());
    Ok(())
}

fn unshare(config: &Config, config_path: &Path, directory: PathBuf) -> anyhow::Result<()> {
    let directory = directory.canonicalize().unwrap_or(directory);
    let mut config = config.clone();
    config.shares.retain(|d| d != &directory);
    config.save(config_path)?;
    println!("No longer sharing {}", directory.display());
    Ok(())
}

async fn search(config: &Config, query: String) -> anyhow::Result<()> {
    let node = start_node(config).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let results = node.search(query.clone()).await?;
    if results.is_empty() {
        println!("No files matching '{query}' found among known peers.");
    } else {
        println!("Found {} file(s) matching '{query}':", results.len());
        for file in results {
            println!(
                "  {}  ({})  owner={}  hash={}",
                file.logical_name,
                format_bytes(file.size),
                file.owner_peer_id,
                hex::encode(file.file_hash)
            );
        }
    }
    Ok(())
}

async fn list_peers(config: &Config, wait: u64) -> anyhow::Result<()> {
    let node = start_node(config).await?;
    tokio::time::sleep(Duration::from_secs(wait)).await;

    let peers = node.discovery().alive_peers();
    if peers.is_empty() {
        println!("No peers discovered in {wait}s.");
    } else {
        println!("Discovered {} peer(s):", peers.len());
        for peer in peers {
            println!("  {}  {}  {}:{}", peer.peer_id, peer.display_name, peer.host, peer.port);
        }
    }
    Ok(())
}

async fn pin_offer(config: &Config, file: PathBuf) -> anyhow::Result<()> {
    let node = start_node(config).await?;
    let data = std::fs::read(&file)?;
    let file_hash = parcel_crypto::hash::hash(&data);
    let logical_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let shared = SharedFile {
        local_path: file.canonicalize().unwrap_or(file.clone()),
        logical_name,
        size: data.len() as u64,
        file_hash,
        owner_peer_id: node.identity().peer_id().clone(),
    };

    node.share_directory(shared.local_path.parent().unwrap_or(Path::new(".")).to_path_buf(), vec![shared.clone()]);
    let session = node.offer_pin(shared).await?;

    println!("PIN: {:06}", session.pin);
    println!("Expires at unix time {}", session.expiry_at);
    println!("\nKeep this running so peers can redeem the PIN. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    Ok(())
}

async fn pin_get(config: &Config, pin: u32, output: Option<PathBuf>) -> anyhow::Result<()> {
    let node = start_node(config).await?;
    let (file, owner) = node.resolve_pin(pin).await?;

    let relay_ref = match node.relay() {
        Some(relay) => relay.find_pin(pin).await.ok().map(|record| record.file_ref),
        None => None,
    };

    let save_dir = output.unwrap_or_else(|| config.node.download_dir.clone());
    std::fs::create_dir_all(&save_dir)?;

    println!("Downloading {} ({}) from {}", file.logical_name, format_bytes(file.size), owner.peer_id);
    let bar = TransferProgress::new(file.size, &file.logical_name);
    let handle = node.download(owner, file, save_dir, relay_ref);
    let transfer_id = handle.lock().await.transfer_id;

    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let Some(progress) = node.transfer_progress(transfer_id).await else {
            continue;
        };
        bar.update(progress.bytes_transferred);
        let eta = progress.eta.map_or_else(|| "unknown".to_string(), |d| format_eta(d.as_secs_f64()));
        bar.set_message(format!(
            "{:.1}% at {}, ETA {}",
            progress.percent(),
            format_speed(progress.speed_bytes_per_sec),
            eta
        ));
        if progress.status.is_terminal() {
            bar.finish_with_message(format!("{:?}", progress.status));
            break;
        }
    }
    Ok(())
}

async fn preview(config: &Config, pin: u32, mime: String, output: Option<PathBuf>) -> anyhow::Result<()> {
    let node = start_node(config).await?;
    let (file, owner) = node.resolve_pin(pin).await?;

    let manifest = node.request_preview_manifest(&owner, &file, &mime).await?;
    manifest.verify(&owner.verifying_key()?)?;

    let Some(&kind) = manifest.available_types.iter().next() else {
        println!("(no preview types available for this file)");
        return Ok(());
    };
    println!("Preview kind: {kind:?}");

    if kind == parcel_core::PreviewContentKind::MetadataOnly {
        println!("(metadata only, no content preview)");
        return Ok(());
    }

    let content = node.request_preview_content(&owner, &file, kind, &mime).await?;
    content.verify_against(&manifest)?;

    println!("Format:     {}", content.format);
    if let Some((w, h)) = content.dims {
        println!("Dimensions: {w}x{h}");
    }

    match output {
        Some(path) => {
            std::fs::write(&path, &content.data)?;
            println!("Saved preview to {}", path.display());
        }
        None => {
            if content.format == "utf8" {
                println!("---\n{}\n---", String::from_utf8_lossy(&content.data));
            } else {
                println!("{} bytes of binary preview data (pass --output to save)", content.data.len());
            }
        }
    }
    Ok(())
}

fn status(config: &Config) -> anyhow::Result<()> {
    println!("Config:");
    println!("  Key file:    {}", config.identity.key_file.display());
    println!("  Listen port: {}", config.node.listen_port);
    println!("  Download to: {}", config.node.download_dir.display());
    println!("  Relay:       {}", config.relay.server_url.as_deref().unwrap_or("(none)"));
    println!("  Shares:");
    for dir in &config.shares {
        println!("    {}", dir.display());
    }
    if config.identity.key_file.exists() {
        println!("\nIdentity file exists at {}.", config.identity.key_file.display());
    } else {
        println!("\nNo identity yet; run `parcel keygen`.");
    }
    Ok(())
}

async fn relay_serve(bind: std::net::SocketAddr, storage_dir: PathBuf) -> anyhow::Result<()> {
    std::fs::create_dir_all(&storage_dir)?;
    let state = parcel_relay::RelayState::new(storage_dir.clone())?;
    let app = parcel_relay::router(state.clone());

    tokio::spawn(parcel_relay::run_sweepers(state));

    println!("Relay listening on {bind}, storing uploads under {}", storage_dir.display());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
