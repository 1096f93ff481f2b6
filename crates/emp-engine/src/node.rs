//! Node assembly and lifecycle.
//!
//! `Node` is the explicitly constructed value that wires the store, the
//! transport, the engine, and the sweeper together. All queues are its
//! owned fields; nothing lives in process-wide state.

use std::net::SocketAddr;
use std::sync::Arc;

use emp_proto::{Frame, FrameKind, Opcode, Version};
use emp_core::Timestamp;
use emp_net::{PeerCommand, Transport, TransportConfig, TransportError};
use emp_store::{ObjectStore, StoreConfig, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::{Engine, EngineConfig};
use crate::registry::{self, RegistryReceivers, DEFAULT_REGISTRY_CAPACITY};
use crate::sweeper::{self, SweeperConfig};

/// Errors during node startup.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Store failed to open
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Transport failed to bind
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Data directory could not be created
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Engine settings (version, advertised address)
    pub engine: EngineConfig,
    /// Transport settings (listen address, timeouts)
    pub transport: TransportConfig,
    /// Store settings (data directory)
    pub store: StoreConfig,
    /// Sweeper settings (interval, retention)
    pub sweeper: SweeperConfig,
    /// Backbone nodes to dial at startup
    pub bootstrap: Vec<SocketAddr>,
    /// Registrar stream buffer size
    pub registry_capacity: usize,
}

impl NodeConfig {
    /// Creates a configuration with defaults rooted at `data_dir`.
    pub fn new(store: StoreConfig) -> Self {
        Self {
            engine: EngineConfig::default(),
            transport: TransportConfig::default(),
            store,
            sweeper: SweeperConfig::default(),
            bootstrap: Vec::new(),
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
        }
    }
}

/// Handle for injecting locally created frames into the engine.
///
/// Injected frames keep an empty peer key, which the engine treats as
/// local origin: broadcasts fan out to every connected peer. This is
/// the seam the RPC façade uses to send, publish, and purge.
///
/// The handle holds only a weak sender, so outstanding injectors never
/// keep a shut-down node's receive queue open.
#[derive(Clone)]
pub struct FrameInjector {
    recv_tx: mpsc::WeakUnboundedSender<Frame>,
}

impl FrameInjector {
    /// Pushes a pre-built frame onto the receive queue. Returns false
    /// once the node has shut down.
    pub fn inject(&self, mut frame: Frame) -> bool {
        frame.peer.clear();
        match self.recv_tx.upgrade() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }
}

/// A running EMP node.
pub struct Node {
    store: Arc<ObjectStore>,
    transport: Arc<Transport>,
    recv_tx: mpsc::UnboundedSender<Frame>,
    engine_task: JoinHandle<()>,
    sweeper_task: JoinHandle<()>,
    send_pump: JoinHandle<()>,
    peer_pump: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    listen_addr: SocketAddr,
}

impl Node {
    /// Opens the store, binds the transport, and starts the engine and
    /// sweeper tasks. Returns the node and the registrar streams.
    pub async fn start(config: NodeConfig) -> Result<(Self, RegistryReceivers), NodeError> {
        config.store.create_dirs()?;
        let store = Arc::new(ObjectStore::open(&config.store.objects_path())?);

        let (recv_tx, recv_rx) = mpsc::unbounded_channel();
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (registry, receivers) = registry::channel(config.registry_capacity);

        let transport = Arc::new(Transport::new(config.transport.clone(), recv_tx.clone()));
        let listen_addr = transport.listen().await?;
        let (send_pump, peer_pump) = transport.spawn_pumps(send_rx, peer_rx);

        let engine = Engine::new(
            config.engine.clone(),
            Arc::clone(&store),
            send_tx,
            peer_tx.clone(),
            registry,
        );
        let engine_task = tokio::spawn(engine.run(recv_rx));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper_task = tokio::spawn(sweeper::run(
            Arc::clone(&store),
            config.sweeper.clone(),
            shutdown_rx,
        ));

        // Initial dial: greet each bootstrap node, then let the
        // handshake cascade pull peers and objects.
        for addr in &config.bootstrap {
            let greeting = Frame::build(
                Opcode::Version,
                FrameKind::Request,
                &Version {
                    version: config.engine.local_version,
                    timestamp: Timestamp::now(),
                    ip: config.engine.local_ip,
                    port: config.engine.local_port,
                },
            );
            if peer_tx
                .send(PeerCommand::Connect {
                    addr: *addr,
                    greeting: Some(greeting),
                })
                .is_err()
            {
                warn!("Peer queue closed during bootstrap");
                break;
            }
        }
        if !config.bootstrap.is_empty() {
            info!(nodes = config.bootstrap.len(), "Bootstrap dials queued");
        }

        let node = Self {
            store,
            transport,
            recv_tx,
            engine_task,
            sweeper_task,
            send_pump,
            peer_pump,
            shutdown_tx,
            listen_addr,
        };
        Ok((node, receivers))
    }

    /// The bound listen address.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// The object store.
    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// A handle for injecting locally created frames.
    pub fn injector(&self) -> FrameInjector {
        FrameInjector {
            recv_tx: self.recv_tx.downgrade(),
        }
    }

    /// Cooperative shutdown: close the receive queue and drain the
    /// engine over still-live connections, stop the sweeper, and tear
    /// the transport down last.
    pub async fn shutdown(self) {
        info!("Shutting down");
        let Self {
            store,
            transport,
            recv_tx,
            engine_task,
            sweeper_task,
            send_pump,
            peer_pump,
            shutdown_tx,
            ..
        } = self;

        // Stop intake only: peer connections must outlive the drain so
        // replies to backlog frames still go out.
        transport.close_intake();
        drop(recv_tx);
        if let Err(e) = engine_task.await {
            warn!(error = %e, "Engine task failed");
        }
        // The pumps finish once the engine drops its queue senders;
        // joining them hands every queued reply to a writer before any
        // connection comes down.
        let _ = send_pump.await;
        let _ = peer_pump.await;

        let _ = shutdown_tx.send(true);
        let _ = sweeper_task.await;

        transport.shutdown();
        store.close();
        info!("Node stopped");
    }
}
