//! Single-engine test rig.
//!
//! Drives the protocol engine synchronously with hand-built frames and
//! captures everything it emits: outbound frames, peer commands, and
//! registrar notifications. No sockets are involved, so scenario tests
//! stay deterministic.

use std::net::IpAddr;
use std::sync::Arc;

use emp_core::WireEncode;
use emp_engine::registry::{self, RegistryReceivers};
use emp_engine::{Engine, EngineConfig};
use emp_net::PeerCommand;
use emp_proto::{Frame, FrameKind, Opcode};
use emp_store::ObjectStore;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// An engine wired to captured queues.
pub struct TestEngine {
    /// The engine under test
    pub engine: Engine,
    /// The engine's store
    pub store: Arc<ObjectStore>,
    /// Captured outbound frames
    pub send_rx: mpsc::UnboundedReceiver<Frame>,
    /// Captured peer commands
    pub peer_rx: mpsc::UnboundedReceiver<PeerCommand>,
    /// Registrar streams
    pub registrations: RegistryReceivers,
    _dir: TempDir,
}

impl TestEngine {
    /// Creates an engine with a fresh store and the given local
    /// address.
    pub fn new(local_ip: IpAddr, local_port: u16) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(ObjectStore::open(dir.path()).expect("store"));
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (registry, registrations) = registry::channel(64);

        let config = EngineConfig {
            local_ip,
            local_port,
            ..EngineConfig::default()
        };
        Self {
            engine: Engine::new(config, Arc::clone(&store), send_tx, peer_tx, registry),
            store,
            send_rx,
            peer_rx,
            registrations,
            _dir: dir,
        }
    }

    /// Delivers a frame as if it arrived from `peer`.
    pub fn deliver<P: WireEncode>(
        &mut self,
        opcode: Opcode,
        kind: FrameKind,
        payload: &P,
        peer: &str,
    ) {
        self.engine
            .handle_frame(Frame::to_peer(opcode, kind, payload, peer));
    }

    /// Drains and returns every pending outbound frame.
    pub fn outbound(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.send_rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Returns the peers the engine asked the transport to drop.
    pub fn kills(&mut self) -> Vec<String> {
        let mut kills = Vec::new();
        while let Ok(cmd) = self.peer_rx.try_recv() {
            if let PeerCommand::Kill(key) = cmd {
                kills.push(key);
            }
        }
        kills
    }
}
