//! The transport: listener, peer table, and queue pumps.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use emp_proto::{peer_key, Frame, FrameKind};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::connection::{read_loop, write_loop, PeerHandle};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("connection timeout")]
    Timeout,

    /// Already connected to this peer
    #[error("already connected to peer")]
    AlreadyConnected,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Commands for the transport, carried on the peer queue.
#[derive(Debug)]
pub enum PeerCommand {
    /// Dial a new peer, optionally sending a first frame once connected.
    ///
    /// The greeting rides with the dial so the handshake opener cannot
    /// race ahead of the connection it needs.
    Connect {
        /// Peer address to dial
        addr: SocketAddr,
        /// Frame to send immediately after the dial succeeds
        greeting: Option<Frame>,
    },
    /// Drop a peer immediately (shun)
    Kill(String),
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Listen address
    pub listen_addr: SocketAddr,
    /// Dial timeout
    pub connect_timeout: Duration,
    /// Upper bound on a single frame's payload
    pub max_frame_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4444".parse().expect("valid literal"),
            connect_timeout: Duration::from_secs(10),
            max_frame_len: 8 * 1024 * 1024,
        }
    }
}

/// Framed TCP transport.
///
/// Owns the per-peer connection handles. Inbound frames land on the
/// receive queue tagged with the observed `"IP:Port"` key of their
/// connection, which is also the key the engine addresses replies to.
pub struct Transport {
    config: TransportConfig,
    peers: Arc<Mutex<HashMap<String, PeerHandle>>>,
    recv_tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    listener: Mutex<Option<tokio::task::AbortHandle>>,
}

impl Transport {
    /// Creates a transport that delivers inbound frames to `recv_tx`.
    pub fn new(config: TransportConfig, recv_tx: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            config,
            peers: Arc::new(Mutex::new(HashMap::new())),
            recv_tx: Mutex::new(Some(recv_tx)),
            listener: Mutex::new(None),
        }
    }

    /// Binds the listen address and spawns the accept loop.
    pub async fn listen(self: &Arc<Self>) -> Result<SocketAddr, TransportError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "Transport listening");

        let transport = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!(peer = %addr, "Accepted connection");
                        transport.attach(stream, addr);
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                    }
                }
            }
        });
        *self.listener.lock() = Some(task.abort_handle());

        Ok(local)
    }

    /// Stops frame intake: no more accepts, reader tasks aborted, and
    /// the receive queue's sender released so the engine can drain.
    ///
    /// Writer tasks stay live, so replies the engine produces while
    /// draining its backlog still reach their peers.
    pub fn close_intake(&self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        for handle in self.peers.lock().values() {
            handle.reader.abort();
        }
        self.recv_tx.lock().take();
    }

    /// Final teardown: drops every peer connection. Call only after the
    /// engine has drained, so queued replies flush ahead of the close.
    pub fn shutdown(&self) {
        self.close_intake();
        let handles: Vec<PeerHandle> = self.peers.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.close();
        }
    }

    /// Spawns the queue pumps: outbound frames and peer commands.
    ///
    /// Both pumps run until their queue's senders drop; the returned
    /// handles let shutdown wait for queued sends to reach the writer
    /// tasks before connections come down.
    pub fn spawn_pumps(
        self: &Arc<Self>,
        mut send_rx: mpsc::UnboundedReceiver<Frame>,
        mut peer_rx: mpsc::UnboundedReceiver<PeerCommand>,
    ) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let transport = Arc::clone(self);
        let send_pump = tokio::spawn(async move {
            while let Some(frame) = send_rx.recv().await {
                transport.send(&frame);
            }
            debug!("Send queue closed");
        });

        let transport = Arc::clone(self);
        let peer_pump = tokio::spawn(async move {
            while let Some(cmd) = peer_rx.recv().await {
                match cmd {
                    PeerCommand::Connect { addr, greeting } => {
                        match transport.add_peer(addr).await {
                            Ok(key) => {
                                if let Some(mut frame) = greeting {
                                    frame.peer = key;
                                    transport.send(&frame);
                                }
                            }
                            Err(e) => {
                                warn!(peer = %addr, error = %e, "Dial failed");
                            }
                        }
                    }
                    PeerCommand::Kill(key) => transport.kill_peer(&key),
                }
            }
            debug!("Peer queue closed");
        });

        (send_pump, peer_pump)
    }

    /// Dials a peer and attaches the connection.
    pub async fn add_peer(&self, addr: SocketAddr) -> Result<String, TransportError> {
        let key = peer_key(addr.ip(), addr.port());
        if self.peers.lock().contains_key(&key) {
            return Err(TransportError::AlreadyConnected);
        }

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!(peer = %key, "Connected");
        self.attach(stream, addr)
            .ok_or_else(|| TransportError::ConnectionFailed("transport shut down".into()))
    }

    /// Drops a peer immediately.
    pub fn kill_peer(&self, key: &str) {
        if let Some(handle) = self.peers.lock().remove(key) {
            info!(peer = %key, "Dropping peer");
            handle.close();
        }
    }

    /// Sends a frame.
    ///
    /// BROADCAST fans out to every peer except `frame.peer` (the source;
    /// empty for locally injected frames, which reach everyone).
    /// REQUEST/REPLY unicast to `frame.peer`.
    pub fn send(&self, frame: &Frame) {
        let wire = frame.to_wire();
        let peers = self.peers.lock();
        match frame.header.kind {
            FrameKind::Broadcast => {
                for (key, handle) in peers.iter() {
                    if *key != frame.peer {
                        handle.send(wire.clone());
                    }
                }
            }
            FrameKind::Request | FrameKind::Reply => match peers.get(&frame.peer) {
                Some(handle) => {
                    handle.send(wire);
                }
                None => {
                    warn!(peer = %frame.peer, opcode = ?frame.header.opcode, "No connection for outbound frame");
                }
            },
        }
    }

    /// Number of live connections.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Registers a connected stream: splits it and spawns the reader and
    /// writer tasks. Returns the peer key, or `None` after shutdown.
    fn attach(&self, stream: TcpStream, addr: SocketAddr) -> Option<String> {
        let recv_tx = self.recv_tx.lock().clone()?;
        let key = peer_key(addr.ip(), addr.port());
        let (read_half, write_half) = stream.into_split();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(write_half, cmd_rx, key.clone()));

        let reader = {
            let key = key.clone();
            let peers = Arc::clone(&self.peers);
            let max_frame_len = self.config.max_frame_len;
            tokio::spawn(async move {
                read_loop(read_half, key.clone(), max_frame_len, recv_tx).await;
                // Reader exit means the connection is gone either way.
                if let Some(handle) = peers.lock().remove(&key) {
                    handle.close();
                }
            })
        };

        let handle = PeerHandle {
            cmd_tx,
            reader: reader.abort_handle(),
        };
        self.peers.lock().insert(key.clone(), handle);
        Some(key)
    }
}
