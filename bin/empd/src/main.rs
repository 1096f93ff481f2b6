//! EMP Daemon - Background service for the EMP gossip overlay.
//!
//! Provides:
//! - Object gossip and replication
//! - Peer discovery and bootstrap
//! - Durable object storage with message sweeping

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use emp_engine::{Node, NodeConfig};
use emp_store::{ObjectStore, StoreConfig};

/// EMP daemon service.
#[derive(Parser)]
#[command(name = "empd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.emp/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default)
    Run {
        /// Listen address
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// Show local store status
    Status,
}

/// Daemon configuration.
#[derive(Debug, Clone)]
struct DaemonConfig {
    /// Listen address
    listen_addr: SocketAddr,
    /// Self-reported routable address, if this is a backbone node
    advertise_ip: Option<IpAddr>,
    /// Advertised port (defaults to the listen port)
    advertise_port: Option<u16>,
    /// Bootstrap nodes
    bootstrap_nodes: Vec<String>,
    /// Data directory
    data_dir: PathBuf,
    /// Sweep interval in seconds
    sweep_interval_secs: u64,
    /// Message retention in seconds
    msg_retention_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4444".parse().expect("valid literal"),
            advertise_ip: None,
            advertise_port: None,
            bootstrap_nodes: Vec::new(),
            data_dir: PathBuf::from("~/.emp/data"),
            sweep_interval_secs: emp_core::DEFAULT_SWEEP_INTERVAL_SECS,
            msg_retention_secs: emp_core::DEFAULT_MSG_RETENTION_SECS,
        }
    }
}

/// Load configuration from TOML file.
fn load_config(path: &PathBuf) -> Result<DaemonConfig> {
    let path = expand_tilde(path);

    if !path.exists() {
        info!("No config file found at {:?}, using defaults", path);
        return Ok(DaemonConfig::default());
    }

    let content = std::fs::read_to_string(&path).context("Failed to read config file")?;
    let toml: toml::Value = content.parse().context("Failed to parse config file")?;

    let mut config = DaemonConfig::default();

    if let Some(network) = toml.get("network") {
        if let Some(listen) = network.get("listen").and_then(|v| v.as_str()) {
            config.listen_addr = listen.parse().context("Invalid listen address")?;
        }
        if let Some(ip) = network.get("advertise_ip").and_then(|v| v.as_str()) {
            config.advertise_ip = Some(ip.parse().context("Invalid advertise_ip")?);
        }
        if let Some(port) = network.get("advertise_port").and_then(|v| v.as_integer()) {
            config.advertise_port = Some(port as u16);
        }
        if let Some(bootstrap) = network.get("bootstrap").and_then(|v| v.as_array()) {
            config.bootstrap_nodes = bootstrap
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect();
        }
    }

    if let Some(storage) = toml.get("storage") {
        if let Some(data_dir) = storage.get("data_dir").and_then(|v| v.as_str()) {
            config.data_dir = PathBuf::from(data_dir);
        }
    }

    if let Some(sweep) = toml.get("sweep") {
        if let Some(interval) = sweep.get("interval_secs").and_then(|v| v.as_integer()) {
            config.sweep_interval_secs = interval as u64;
        }
        if let Some(retention) = sweep.get("retention_secs").and_then(|v| v.as_integer()) {
            config.msg_retention_secs = retention as u64;
        }
    }

    Ok(config)
}

/// Expand ~ to home directory.
fn expand_tilde(path: &PathBuf) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&s[2..]);
        }
    }
    path.clone()
}

fn node_config(config: &DaemonConfig) -> Result<NodeConfig> {
    let data_dir = expand_tilde(&config.data_dir);
    let mut node = NodeConfig::new(StoreConfig::new(data_dir));

    node.transport.listen_addr = config.listen_addr;
    if let Some(ip) = config.advertise_ip {
        node.engine.local_ip = ip;
    }
    node.engine.local_port = config
        .advertise_port
        .unwrap_or_else(|| config.listen_addr.port());
    node.sweeper.interval = Duration::from_secs(config.sweep_interval_secs);
    node.sweeper.retention = Duration::from_secs(config.msg_retention_secs);

    for addr_str in &config.bootstrap_nodes {
        match addr_str.parse::<SocketAddr>() {
            Ok(addr) => node.bootstrap.push(addr),
            Err(e) => warn!("Invalid bootstrap address {}: {}", addr_str, e),
        }
    }

    Ok(node)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    let mut config = load_config(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run { listen: None }) {
        Commands::Run { listen } => {
            if let Some(addr) = listen {
                config.listen_addr = addr;
            }

            info!("Starting EMP daemon");
            info!("Listen address: {}", config.listen_addr);
            info!("Data directory: {:?}", expand_tilde(&config.data_dir));

            let (node, mut registrations) = Node::start(node_config(&config)?)
                .await
                .context("Failed to start node")?;

            // Surface registrations in the log until an RPC consumer
            // claims the streams.
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(hash) = registrations.pubkey.recv() => {
                            info!(hash = %hash, "Pubkey registered");
                        }
                        Some(msg) = registrations.message.recv() => {
                            info!(hash = %msg.txid_hash, "Message registered");
                        }
                        Some(msg) = registrations.publication.recv() => {
                            info!(hash = %msg.txid_hash, "Publication registered");
                        }
                        Some(txid) = registrations.purge.recv() => {
                            info!(?txid, "Purge registered");
                        }
                        else => break,
                    }
                }
            });

            println!("EMP daemon running");
            println!("  Listen: {}", node.listen_addr());
            println!();
            println!("Press Ctrl+C to stop");

            signal::ctrl_c().await.context("Failed to wait for ctrl-c")?;
            info!("Received shutdown signal");
            node.shutdown().await;
        }

        Commands::Status => {
            let data_dir = expand_tilde(&config.data_dir);
            let store = ObjectStore::open(&StoreConfig::new(data_dir.clone()).objects_path())
                .context("Failed to open object store")?;

            println!("EMP Daemon Status");
            println!("=================");
            println!();
            println!("Listen: {}", config.listen_addr);
            println!("Data directory: {:?}", data_dir);
            println!("Objects held: {}", store.obj_list().len());
        }
    }

    Ok(())
}
