//! The protocol engine: one dispatch per inbound frame.
//!
//! The engine is the sole consumer of the receive queue and the sole
//! owner of the peer table. Handlers are synchronous; the task suspends
//! only between frames. Every error inside a handler is logged and the
//! engine moves to the next frame — disconnection is the only visible
//! consequence of a protocol violation.

use std::net::IpAddr;
use std::sync::Arc;

use emp_core::{Hash, Timestamp, WireDecode, LOCAL_VERSION};
use emp_net::PeerCommand;
use emp_proto::{
    ip_to_wire, EncryptedPubkey, Frame, FrameKind, Message, NilPayload, Node, NodeList, ObjList,
    Opcode, Purge, Version, NO_ADDRESS,
};
use emp_store::{ObjectKind, ObjectStore};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::Registry;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Protocol version advertised and required of peers
    pub local_version: u32,
    /// Self-reported routable address; the unspecified address marks a
    /// non-backbone node
    pub local_ip: IpAddr,
    /// Advertised listening port
    pub local_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            local_version: LOCAL_VERSION,
            local_ip: NO_ADDRESS,
            local_port: 4444,
        }
    }
}

/// The protocol engine.
///
/// Owns the peer table outright; other tasks reach peer state only
/// through the engine's queues.
pub struct Engine {
    config: EngineConfig,
    store: Arc<ObjectStore>,
    peers: NodeList,
    send_tx: mpsc::UnboundedSender<Frame>,
    peer_tx: mpsc::UnboundedSender<PeerCommand>,
    registry: Registry,
}

impl Engine {
    /// Creates an engine over the given store and queues.
    pub fn new(
        config: EngineConfig,
        store: Arc<ObjectStore>,
        send_tx: mpsc::UnboundedSender<Frame>,
        peer_tx: mpsc::UnboundedSender<PeerCommand>,
        registry: Registry,
    ) -> Self {
        Self {
            config,
            store,
            peers: NodeList::new(),
            send_tx,
            peer_tx,
            registry,
        }
    }

    /// Runs the dispatch loop until the receive queue closes.
    pub async fn run(mut self, mut recv_rx: mpsc::UnboundedReceiver<Frame>) {
        info!("Engine started");
        while let Some(frame) = recv_rx.recv().await {
            self.handle_frame(frame);
        }
        info!("Receive queue closed, engine stopping");
    }

    /// Dispatches a single inbound frame.
    pub fn handle_frame(&mut self, frame: Frame) {
        let opcode = frame.header.opcode;
        if opcode.unicast_only() && frame.header.kind == FrameKind::Broadcast {
            self.shun(&frame.peer, "unicast opcode sent as broadcast");
            return;
        }

        let result = match opcode {
            Opcode::Version => {
                Version::from_bytes(&frame.payload).map(|v| self.handle_version(&frame, v))
            }
            Opcode::Peer => {
                NodeList::from_bytes(&frame.payload).map(|l| self.handle_peer(&frame, l))
            }
            Opcode::Obj => ObjList::from_bytes(&frame.payload).map(|l| self.handle_obj(&frame, l)),
            Opcode::GetObj => {
                Hash::from_bytes(&frame.payload).map(|h| self.handle_getobj(&frame, h))
            }
            Opcode::PubkeyRequest => {
                Hash::from_bytes(&frame.payload).map(|h| self.handle_pubkey_request(&frame, h))
            }
            Opcode::Pubkey => {
                EncryptedPubkey::from_bytes(&frame.payload).map(|p| self.handle_pubkey(&frame, p))
            }
            Opcode::Msg => Message::from_bytes(&frame.payload).map(|m| self.handle_msg(&frame, m)),
            Opcode::Pub => Message::from_bytes(&frame.payload).map(|m| self.handle_pub(&frame, m)),
            Opcode::Purge => {
                Purge::from_bytes(&frame.payload).map(|p| self.handle_purge(&frame, p))
            }
            Opcode::CheckTxid => {
                Hash::from_bytes(&frame.payload).map(|h| self.handle_checktxid(&frame, h))
            }
        };

        // Malformed frames are dropped, not punished: the sender's
        // framing layer may be at fault rather than the peer.
        if let Err(e) = result {
            warn!(peer = %frame.peer, opcode = ?opcode, error = %e, "Dropping malformed frame");
        }
    }

    /// Read-only view of the peer table.
    pub fn peers(&self) -> &NodeList {
        &self.peers
    }

    fn handle_version(&mut self, frame: &Frame, version: Version) {
        if version.version != self.config.local_version {
            self.shun(
                &frame.peer,
                &format!("protocol version mismatch: {}", version.version),
            );
            return;
        }

        if !version.timestamp.within_clock_skew(&Timestamp::now()) {
            self.shun(&frame.peer, "version timestamp outside skew window");
            return;
        }

        if version.is_backbone() {
            // A backbone node must report the address its connection
            // actually comes from; anything else is a spoof.
            match observed_ip(&frame.peer) {
                Some(observed) if same_ip(&version.ip, &observed) => {
                    self.peers.insert(Node {
                        ip: version.ip,
                        port: version.port,
                        last_seen: Timestamp::now(),
                    });
                }
                _ => {
                    self.shun(&frame.peer, "backbone node reported a foreign address");
                    return;
                }
            }
        }

        let reply = match frame.header.kind {
            FrameKind::Request => {
                Frame::to_peer(
                    Opcode::Version,
                    FrameKind::Reply,
                    &self.local_version_payload(),
                    frame.peer.clone(),
                )
            }
            _ => Frame::to_peer(
                Opcode::Peer,
                FrameKind::Request,
                &self.peers,
                frame.peer.clone(),
            ),
        };
        self.push(reply);
    }

    fn handle_peer(&mut self, frame: &Frame, list: NodeList) {
        let reply = match frame.header.kind {
            FrameKind::Request => Frame::to_peer(
                Opcode::Peer,
                FrameKind::Reply,
                &self.peers,
                frame.peer.clone(),
            ),
            _ => Frame::to_peer(
                Opcode::Obj,
                FrameKind::Request,
                &self.local_obj_list(),
                frame.peer.clone(),
            ),
        };
        self.push(reply);

        self.merge_peers(list);
    }

    fn handle_obj(&mut self, frame: &Frame, list: ObjList) {
        if frame.header.kind == FrameKind::Request {
            self.push(Frame::to_peer(
                Opcode::Obj,
                FrameKind::Reply,
                &self.local_obj_list(),
                frame.peer.clone(),
            ));
        }

        // Pull anything unknown; re-check held messages for purges.
        for hash in &list.hashes {
            match self.store.contains(hash) {
                ObjectKind::NotFound => {
                    self.push(Frame::to_peer(
                        Opcode::GetObj,
                        FrameKind::Request,
                        hash,
                        frame.peer.clone(),
                    ));
                }
                ObjectKind::Msg => {
                    self.push(Frame::to_peer(
                        Opcode::CheckTxid,
                        FrameKind::Request,
                        hash,
                        frame.peer.clone(),
                    ));
                }
                _ => {}
            }
        }
    }

    fn handle_getobj(&mut self, frame: &Frame, hash: Hash) {
        if frame.header.kind != FrameKind::Request {
            return;
        }

        let reply = match self.store.contains(&hash) {
            ObjectKind::Pubkey => match self.store.get_pubkey(&hash) {
                Some(pubkey) => Frame::build(Opcode::Pubkey, FrameKind::Reply, &pubkey),
                None => {
                    warn!(hash = %hash, "Indexed pubkey missing from store");
                    return;
                }
            },
            ObjectKind::Purge => match self.store.get_purge(&hash) {
                Some(purge) => Frame::build(Opcode::Purge, FrameKind::Reply, &purge),
                None => {
                    warn!(hash = %hash, "Indexed purge missing from store");
                    return;
                }
            },
            ObjectKind::Msg => match self.store.get_message(&hash) {
                Some(msg) => Frame::build(Opcode::Msg, FrameKind::Reply, &msg),
                None => {
                    warn!(hash = %hash, "Indexed message missing from store");
                    return;
                }
            },
            ObjectKind::Pub => match self.store.get_pub(&hash) {
                Some(msg) => Frame::build(Opcode::Pub, FrameKind::Reply, &msg),
                None => {
                    warn!(hash = %hash, "Indexed publication missing from store");
                    return;
                }
            },
            ObjectKind::PubkeyRequest => {
                Frame::build(Opcode::PubkeyRequest, FrameKind::Reply, &hash)
            }
            ObjectKind::NotFound => Frame::build(Opcode::GetObj, FrameKind::Reply, &NilPayload),
        };
        self.push_to(reply, &frame.peer);
    }

    fn handle_pubkey_request(&mut self, frame: &Frame, hash: Hash) {
        match self.store.contains(&hash) {
            ObjectKind::NotFound => {
                if let Err(e) = self.store.add_request(&hash) {
                    warn!(hash = %hash, error = %e, "Failed to record pubkey request");
                    return;
                }
                if frame.header.kind == FrameKind::Broadcast {
                    self.push_to(
                        Frame::build(Opcode::PubkeyRequest, FrameKind::Broadcast, &hash),
                        &frame.peer,
                    );
                }
            }
            ObjectKind::Pubkey => {
                // We already hold the answer: broadcast it.
                match self.store.get_pubkey(&hash) {
                    Some(pubkey) => self.push_to(
                        Frame::build(Opcode::Pubkey, FrameKind::Broadcast, &pubkey),
                        &frame.peer,
                    ),
                    None => warn!(hash = %hash, "Indexed pubkey missing from store"),
                }
            }
            _ => {}
        }
    }

    fn handle_pubkey(&mut self, frame: &Frame, pubkey: EncryptedPubkey) {
        match self.store.contains(&pubkey.addr_hash) {
            kind @ (ObjectKind::PubkeyRequest | ObjectKind::NotFound) => {
                if kind == ObjectKind::PubkeyRequest {
                    // The pubkey satisfies the pending request.
                    if let Err(e) = self.store.remove(&pubkey.addr_hash) {
                        warn!(hash = %pubkey.addr_hash, error = %e, "Failed to clear pubkey request");
                        return;
                    }
                }
                if let Err(e) = self.store.add_pubkey(&pubkey) {
                    warn!(hash = %pubkey.addr_hash, error = %e, "Failed to store pubkey");
                    return;
                }
                if frame.header.kind == FrameKind::Broadcast {
                    self.push_to(
                        Frame::build(Opcode::Pubkey, FrameKind::Broadcast, &pubkey),
                        &frame.peer,
                    );
                }
                self.registry.pubkey_registered(pubkey.addr_hash);
            }
            _ => {}
        }
    }

    fn handle_msg(&mut self, frame: &Frame, msg: Message) {
        match self.store.contains(&msg.txid_hash) {
            ObjectKind::NotFound => {
                if let Err(e) = self.store.add_message(&msg) {
                    warn!(hash = %msg.txid_hash, error = %e, "Failed to store message");
                    return;
                }
                self.push_to(
                    Frame::build(Opcode::Msg, FrameKind::Broadcast, &msg),
                    &frame.peer,
                );
                self.registry.message_registered(msg);
            }
            ObjectKind::Purge => {
                // Already purged: answer with the token instead.
                debug!(hash = %msg.txid_hash, "Received already-purged message");
                match self.store.get_purge(&msg.txid_hash) {
                    Some(purge) => self.push(Frame::to_peer(
                        Opcode::Purge,
                        FrameKind::Reply,
                        &purge,
                        frame.peer.clone(),
                    )),
                    None => warn!(hash = %msg.txid_hash, "Indexed purge missing from store"),
                }
            }
            _ => {}
        }
    }

    fn handle_pub(&mut self, frame: &Frame, msg: Message) {
        match self.store.contains(&msg.txid_hash) {
            ObjectKind::NotFound => {
                if let Err(e) = self.store.add_pub(&msg) {
                    warn!(hash = %msg.txid_hash, error = %e, "Failed to store publication");
                    return;
                }
                self.push_to(
                    Frame::build(Opcode::Pub, FrameKind::Broadcast, &msg),
                    &frame.peer,
                );
                self.registry.publication_registered(msg);
            }
            ObjectKind::Purge => {
                debug!(hash = %msg.txid_hash, "Received already-purged publication");
                match self.store.get_purge(&msg.txid_hash) {
                    Some(purge) => self.push(Frame::to_peer(
                        Opcode::Purge,
                        FrameKind::Reply,
                        &purge,
                        frame.peer.clone(),
                    )),
                    None => warn!(hash = %msg.txid_hash, "Indexed purge missing from store"),
                }
            }
            _ => {}
        }
    }

    fn handle_purge(&mut self, frame: &Frame, purge: Purge) {
        let hash = purge.txid_hash();
        match self.store.contains(&hash) {
            ObjectKind::Msg | ObjectKind::Pub | ObjectKind::NotFound => {
                // The store deletes a superseded message or publication
                // in the same locked step as the purge insert.
                if let Err(e) = self.store.add_purge(&purge) {
                    warn!(hash = %hash, error = %e, "Failed to store purge");
                    return;
                }
                self.push_to(
                    Frame::build(Opcode::Purge, FrameKind::Broadcast, &purge),
                    &frame.peer,
                );
                self.registry.purge_registered(purge.txid);
            }
            _ => {}
        }
    }

    fn handle_checktxid(&mut self, frame: &Frame, hash: Hash) {
        if frame.header.kind != FrameKind::Request {
            return;
        }

        let reply = match self.store.get_purge(&hash) {
            Some(purge) => Frame::build(Opcode::Purge, FrameKind::Reply, &purge),
            None => Frame::build(Opcode::CheckTxid, FrameKind::Reply, &NilPayload),
        };
        self.push_to(reply, &frame.peer);
    }

    /// Merges a received node list into the peer table.
    ///
    /// New entries trigger a dial carrying a VERSION/REQUEST greeting,
    /// which starts the handshake cascade with the new peer. Entries
    /// reporting the local node's own address are never inserted.
    fn merge_peers(&mut self, remote: NodeList) {
        for (key, node) in remote.nodes {
            if same_ip(&node.ip, &self.config.local_ip) {
                continue;
            }
            if self.peers.contains(&key) {
                continue;
            }

            debug!(peer = %key, "Learned new peer");
            let addr = std::net::SocketAddr::new(node.ip, node.port);
            self.peers.insert(node);

            let greeting = Frame::build(
                Opcode::Version,
                FrameKind::Request,
                &self.local_version_payload(),
            );
            if self
                .peer_tx
                .send(PeerCommand::Connect {
                    addr,
                    greeting: Some(greeting),
                })
                .is_err()
            {
                warn!("Peer queue closed");
                return;
            }
        }
    }

    fn local_version_payload(&self) -> Version {
        Version {
            version: self.config.local_version,
            timestamp: Timestamp::now(),
            ip: self.config.local_ip,
            port: self.config.local_port,
        }
    }

    fn local_obj_list(&self) -> ObjList {
        ObjList {
            hashes: self.store.obj_list(),
        }
    }

    /// Queues an outbound frame.
    fn push(&self, frame: Frame) {
        if self.send_tx.send(frame).is_err() {
            warn!("Send queue closed");
        }
    }

    /// Queues an outbound frame attributed to `peer` (the unicast
    /// destination, or the broadcast source to exclude).
    fn push_to(&self, mut frame: Frame, peer: &str) {
        frame.peer = peer.to_string();
        self.push(frame);
    }

    /// Disconnects a peer for a protocol violation.
    fn shun(&self, peer: &str, reason: &str) {
        if peer.is_empty() {
            // Locally injected frames have no connection to drop.
            warn!(reason, "Protocol violation on local frame");
            return;
        }
        warn!(peer = %peer, reason, "Disconnecting peer");
        if self
            .peer_tx
            .send(PeerCommand::Kill(peer.to_string()))
            .is_err()
        {
            warn!("Peer queue closed");
        }
    }
}

/// Extracts the transport-observed IP from a canonical `"IP:Port"` key.
fn observed_ip(peer: &str) -> Option<IpAddr> {
    let (ip, _port) = peer.rsplit_once(':')?;
    ip.parse().ok()
}

/// Address equality modulo v4-mapped representation.
fn same_ip(a: &IpAddr, b: &IpAddr) -> bool {
    ip_to_wire(a) == ip_to_wire(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{self, RegistryReceivers};
    use emp_core::{Txid, WireEncode, TXID_LEN};
    use tempfile::TempDir;

    const PEER: &str = "1.2.3.4:5000";

    struct Rig {
        engine: Engine,
        send_rx: mpsc::UnboundedReceiver<Frame>,
        peer_rx: mpsc::UnboundedReceiver<PeerCommand>,
        receivers: RegistryReceivers,
        _dir: TempDir,
    }

    impl Rig {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(ObjectStore::open(dir.path()).unwrap());
            let (send_tx, send_rx) = mpsc::unbounded_channel();
            let (peer_tx, peer_rx) = mpsc::unbounded_channel();
            let (registry, receivers) = registry::channel(16);

            let config = EngineConfig {
                local_version: LOCAL_VERSION,
                local_ip: "10.9.9.9".parse().unwrap(),
                local_port: 4444,
            };
            Self {
                engine: Engine::new(config, store, send_tx, peer_tx, registry),
                send_rx,
                peer_rx,
                receivers,
                _dir: dir,
            }
        }

        fn deliver<P: emp_core::WireEncode>(&mut self, opcode: Opcode, kind: FrameKind, payload: &P) {
            self.engine
                .handle_frame(Frame::to_peer(opcode, kind, payload, PEER));
        }

        fn outbound(&mut self) -> Vec<Frame> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.send_rx.try_recv() {
                frames.push(frame);
            }
            frames
        }

        fn killed(&mut self) -> Option<String> {
            while let Ok(cmd) = self.peer_rx.try_recv() {
                if let PeerCommand::Kill(key) = cmd {
                    return Some(key);
                }
            }
            None
        }
    }

    fn valid_version() -> Version {
        Version {
            version: LOCAL_VERSION,
            timestamp: Timestamp::now(),
            ip: NO_ADDRESS,
            port: 9000,
        }
    }

    fn message_with_hash(txid_hash: Hash) -> Message {
        Message {
            addr_hash: Hash::of(b"recipient"),
            txid_hash,
            timestamp: Timestamp::now(),
            content: vec![0xEE; 16],
        }
    }

    #[test]
    fn test_version_request_gets_reply() {
        let mut rig = Rig::new();
        rig.deliver(Opcode::Version, FrameKind::Request, &valid_version());

        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::Version);
        assert_eq!(frames[0].header.kind, FrameKind::Reply);
        assert_eq!(frames[0].peer, PEER);
        assert!(rig.killed().is_none());
        // All-zero IP: not admitted to the peer table.
        assert!(rig.engine.peers().is_empty());
    }

    #[test]
    fn test_version_reply_triggers_peer_request() {
        let mut rig = Rig::new();
        rig.deliver(Opcode::Version, FrameKind::Reply, &valid_version());

        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::Peer);
        assert_eq!(frames[0].header.kind, FrameKind::Request);
    }

    #[test]
    fn test_version_mismatch_disconnects() {
        let mut rig = Rig::new();
        let mut version = valid_version();
        version.version = 2;
        rig.deliver(Opcode::Version, FrameKind::Request, &version);

        assert_eq!(rig.killed().as_deref(), Some(PEER));
        assert!(rig.outbound().is_empty());
    }

    #[test]
    fn test_stale_timestamp_disconnects() {
        let mut rig = Rig::new();
        let mut version = valid_version();
        version.timestamp = Timestamp::new(Timestamp::now().as_secs() - 400);
        rig.deliver(Opcode::Version, FrameKind::Request, &version);

        assert_eq!(rig.killed().as_deref(), Some(PEER));
        assert!(rig.outbound().is_empty());
    }

    #[test]
    fn test_unicast_opcode_as_broadcast_disconnects() {
        let mut rig = Rig::new();
        for opcode in [
            Opcode::Version,
            Opcode::Peer,
            Opcode::Obj,
            Opcode::GetObj,
            Opcode::CheckTxid,
        ] {
            rig.deliver(opcode, FrameKind::Broadcast, &NilPayload);
            assert_eq!(rig.killed().as_deref(), Some(PEER), "{opcode:?}");
            assert!(rig.outbound().is_empty(), "{opcode:?}");
        }
    }

    #[test]
    fn test_backbone_spoofed_ip_disconnects() {
        let mut rig = Rig::new();
        let mut version = valid_version();
        version.ip = "8.8.8.8".parse().unwrap();
        rig.deliver(Opcode::Version, FrameKind::Request, &version);

        assert_eq!(rig.killed().as_deref(), Some(PEER));
        assert!(rig.outbound().is_empty());
        assert!(rig.engine.peers().is_empty());
    }

    #[test]
    fn test_backbone_admission() {
        let mut rig = Rig::new();
        let mut version = valid_version();
        version.ip = "1.2.3.4".parse().unwrap();
        rig.deliver(Opcode::Version, FrameKind::Request, &version);

        assert!(rig.killed().is_none());
        // Keyed by the advertised listening port, not the socket port.
        assert!(rig.engine.peers().contains("1.2.3.4:9000"));
    }

    #[test]
    fn test_peer_request_gets_local_list() {
        let mut rig = Rig::new();
        rig.deliver(Opcode::Peer, FrameKind::Request, &NodeList::new());

        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::Peer);
        assert_eq!(frames[0].header.kind, FrameKind::Reply);
    }

    #[test]
    fn test_peer_reply_requests_objects_and_merges() {
        let mut rig = Rig::new();
        let mut list = NodeList::new();
        list.insert(Node {
            ip: "5.6.7.8".parse().unwrap(),
            port: 4444,
            last_seen: Timestamp::now(),
        });
        rig.deliver(Opcode::Peer, FrameKind::Reply, &list);

        let frames = rig.outbound();
        // OBJ/REQUEST back to the sender, VERSION greeting for the dial.
        assert_eq!(frames[0].header.opcode, Opcode::Obj);
        assert_eq!(frames[0].header.kind, FrameKind::Request);
        assert!(rig.engine.peers().contains("5.6.7.8:4444"));

        match rig.peer_rx.try_recv().unwrap() {
            PeerCommand::Connect { addr, greeting } => {
                assert_eq!(addr.to_string(), "5.6.7.8:4444");
                let greeting = greeting.unwrap();
                assert_eq!(greeting.header.opcode, Opcode::Version);
                assert_eq!(greeting.header.kind, FrameKind::Request);
            }
            other => panic!("expected connect, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_never_inserts_local_ip() {
        let mut rig = Rig::new();
        let mut list = NodeList::new();
        list.insert(Node {
            ip: "10.9.9.9".parse().unwrap(),
            port: 7777,
            last_seen: Timestamp::now(),
        });
        rig.deliver(Opcode::Peer, FrameKind::Reply, &list);

        assert!(rig.engine.peers().is_empty());
        assert!(matches!(rig.peer_rx.try_recv(), Err(_)));
    }

    #[test]
    fn test_obj_request_pulls_unknown_and_checks_messages() {
        let mut rig = Rig::new();
        let held = message_with_hash(Hash::of(b"held"));
        rig.engine.store.add_message(&held).unwrap();

        let unknown = Hash::of(b"unknown");
        let list = ObjList {
            hashes: vec![unknown, held.txid_hash],
        };
        rig.deliver(Opcode::Obj, FrameKind::Request, &list);

        let frames = rig.outbound();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].header.opcode, Opcode::Obj);
        assert_eq!(frames[0].header.kind, FrameKind::Reply);
        assert_eq!(frames[1].header.opcode, Opcode::GetObj);
        assert_eq!(frames[1].payload, unknown.to_bytes());
        assert_eq!(frames[2].header.opcode, Opcode::CheckTxid);
        assert_eq!(frames[2].payload, held.txid_hash.to_bytes());
    }

    #[test]
    fn test_getobj_not_found_replies_nil() {
        let mut rig = Rig::new();
        rig.deliver(Opcode::GetObj, FrameKind::Request, &Hash::of(b"missing"));

        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::GetObj);
        assert_eq!(frames[0].header.kind, FrameKind::Reply);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_getobj_serves_each_kind() {
        let mut rig = Rig::new();
        let pubkey = EncryptedPubkey {
            addr_hash: Hash::of(b"addr"),
            iv: [1; emp_core::IV_LEN],
            payload: vec![2; 32],
        };
        rig.engine.store.add_pubkey(&pubkey).unwrap();

        rig.deliver(Opcode::GetObj, FrameKind::Request, &pubkey.addr_hash);
        let frames = rig.outbound();
        assert_eq!(frames[0].header.opcode, Opcode::Pubkey);
        assert_eq!(frames[0].header.kind, FrameKind::Reply);
        assert_eq!(
            EncryptedPubkey::from_bytes(&frames[0].payload).unwrap(),
            pubkey
        );

        let wanted = Hash::of(b"wanted");
        rig.engine.store.add_request(&wanted).unwrap();
        rig.deliver(Opcode::GetObj, FrameKind::Request, &wanted);
        let frames = rig.outbound();
        assert_eq!(frames[0].header.opcode, Opcode::PubkeyRequest);
        assert_eq!(frames[0].header.kind, FrameKind::Reply);
    }

    #[test]
    fn test_pubkey_request_stored_and_rebroadcast() {
        let mut rig = Rig::new();
        let wanted = Hash::of(b"wanted");
        rig.deliver(Opcode::PubkeyRequest, FrameKind::Broadcast, &wanted);

        assert_eq!(
            rig.engine.store.contains(&wanted),
            ObjectKind::PubkeyRequest
        );
        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::PubkeyRequest);
        assert_eq!(frames[0].header.kind, FrameKind::Broadcast);
        assert_eq!(frames[0].peer, PEER);
    }

    #[test]
    fn test_pubkey_satisfies_pending_request() {
        let mut rig = Rig::new();
        let pubkey = EncryptedPubkey {
            addr_hash: Hash::of(b"addr"),
            iv: [3; emp_core::IV_LEN],
            payload: vec![4; 32],
        };
        rig.deliver(Opcode::PubkeyRequest, FrameKind::Broadcast, &pubkey.addr_hash);
        rig.outbound();

        rig.deliver(Opcode::Pubkey, FrameKind::Broadcast, &pubkey);
        assert_eq!(
            rig.engine.store.contains(&pubkey.addr_hash),
            ObjectKind::Pubkey
        );
        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::Pubkey);
        assert_eq!(frames[0].header.kind, FrameKind::Broadcast);
        assert_eq!(
            rig.receivers.pubkey.try_recv().unwrap(),
            pubkey.addr_hash
        );
    }

    #[test]
    fn test_held_pubkey_answers_request() {
        let mut rig = Rig::new();
        let pubkey = EncryptedPubkey {
            addr_hash: Hash::of(b"addr"),
            iv: [5; emp_core::IV_LEN],
            payload: vec![6; 32],
        };
        rig.engine.store.add_pubkey(&pubkey).unwrap();

        rig.deliver(Opcode::PubkeyRequest, FrameKind::Broadcast, &pubkey.addr_hash);
        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::Pubkey);
        assert_eq!(frames[0].header.kind, FrameKind::Broadcast);
    }

    #[test]
    fn test_msg_stored_rebroadcast_and_registered() {
        let mut rig = Rig::new();
        let msg = message_with_hash(Hash::of(b"fresh"));
        rig.deliver(Opcode::Msg, FrameKind::Broadcast, &msg);

        assert_eq!(rig.engine.store.contains(&msg.txid_hash), ObjectKind::Msg);
        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::Msg);
        assert_eq!(frames[0].header.kind, FrameKind::Broadcast);
        assert_eq!(frames[0].peer, PEER);
        assert_eq!(rig.receivers.message.try_recv().unwrap(), msg);
    }

    #[test]
    fn test_pub_stored_rebroadcast_and_registered() {
        let mut rig = Rig::new();
        let msg = message_with_hash(Hash::of(b"feed"));
        rig.deliver(Opcode::Pub, FrameKind::Broadcast, &msg);

        assert_eq!(rig.engine.store.contains(&msg.txid_hash), ObjectKind::Pub);
        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::Pub);
        assert_eq!(frames[0].header.kind, FrameKind::Broadcast);
        assert_eq!(frames[0].peer, PEER);
        assert_eq!(rig.receivers.publication.try_recv().unwrap(), msg);
        // Publications never land on the direct-message stream.
        assert!(rig.receivers.message.try_recv().is_err());
    }

    #[test]
    fn test_getobj_serves_held_pub() {
        let mut rig = Rig::new();
        let msg = message_with_hash(Hash::of(b"held-pub"));
        rig.engine.store.add_pub(&msg).unwrap();

        rig.deliver(Opcode::GetObj, FrameKind::Request, &msg.txid_hash);
        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::Pub);
        assert_eq!(frames[0].header.kind, FrameKind::Reply);
        assert_eq!(Message::from_bytes(&frames[0].payload).unwrap(), msg);
    }

    #[test]
    fn test_pub_for_purged_hash_replies_with_purge() {
        let mut rig = Rig::new();
        let purge = Purge {
            txid: Txid::new([14; TXID_LEN]),
            signature: vec![15; 65],
        };
        rig.engine.store.add_purge(&purge).unwrap();

        let msg = message_with_hash(purge.txid_hash());
        rig.deliver(Opcode::Pub, FrameKind::Broadcast, &msg);

        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::Purge);
        assert_eq!(frames[0].header.kind, FrameKind::Reply);
        assert_eq!(Purge::from_bytes(&frames[0].payload).unwrap(), purge);
        assert!(rig.receivers.publication.try_recv().is_err());
    }

    #[test]
    fn test_replayed_broadcast_is_inert() {
        let mut rig = Rig::new();
        let msg = message_with_hash(Hash::of(b"once"));
        rig.deliver(Opcode::Msg, FrameKind::Broadcast, &msg);
        rig.outbound();
        rig.receivers.message.try_recv().unwrap();

        rig.deliver(Opcode::Msg, FrameKind::Broadcast, &msg);
        assert!(rig.outbound().is_empty());
        assert!(rig.receivers.message.try_recv().is_err());
    }

    #[test]
    fn test_purge_supersedes_held_message() {
        let mut rig = Rig::new();
        let purge = Purge {
            txid: Txid::new([8; TXID_LEN]),
            signature: vec![9; 65],
        };
        let hash = purge.txid_hash();
        rig.engine
            .store
            .add_message(&message_with_hash(hash))
            .unwrap();

        rig.deliver(Opcode::Purge, FrameKind::Broadcast, &purge);

        assert_eq!(rig.engine.store.contains(&hash), ObjectKind::Purge);
        assert!(rig.engine.store.get_message(&hash).is_none());
        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::Purge);
        assert_eq!(frames[0].header.kind, FrameKind::Broadcast);
        assert_eq!(rig.receivers.purge.try_recv().unwrap(), purge.txid);
    }

    #[test]
    fn test_msg_for_purged_hash_replies_with_purge() {
        let mut rig = Rig::new();
        let purge = Purge {
            txid: Txid::new([10; TXID_LEN]),
            signature: vec![11; 65],
        };
        rig.engine.store.add_purge(&purge).unwrap();

        let msg = message_with_hash(purge.txid_hash());
        rig.deliver(Opcode::Msg, FrameKind::Broadcast, &msg);

        let frames = rig.outbound();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.opcode, Opcode::Purge);
        assert_eq!(frames[0].header.kind, FrameKind::Reply);
        assert_eq!(Purge::from_bytes(&frames[0].payload).unwrap(), purge);
        assert!(rig.receivers.message.try_recv().is_err());
    }

    #[test]
    fn test_checktxid_replies_purge_or_nil() {
        let mut rig = Rig::new();
        let purge = Purge {
            txid: Txid::new([12; TXID_LEN]),
            signature: vec![13; 65],
        };
        rig.engine.store.add_purge(&purge).unwrap();

        rig.deliver(Opcode::CheckTxid, FrameKind::Request, &purge.txid_hash());
        let frames = rig.outbound();
        assert_eq!(frames[0].header.opcode, Opcode::Purge);
        assert_eq!(frames[0].header.kind, FrameKind::Reply);

        rig.deliver(Opcode::CheckTxid, FrameKind::Request, &Hash::of(b"nothing"));
        let frames = rig.outbound();
        assert_eq!(frames[0].header.opcode, Opcode::CheckTxid);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_malformed_payload_dropped_without_disconnect() {
        let mut rig = Rig::new();
        // Four bytes cannot hold a Version payload.
        rig.deliver(Opcode::Version, FrameKind::Request, &7u32);

        assert!(rig.outbound().is_empty());
        assert!(rig.killed().is_none());
    }
}
