//! Engine-level protocol scenarios.
//!
//! Each test walks one leg of the gossip protocol against a single
//! engine, asserting the exact frames it emits and the state it keeps.

use emp_core::{Hash, Timestamp, Txid, WireDecode, WireEncode, LOCAL_VERSION, TXID_LEN};
use emp_proto::{
    EncryptedPubkey, FrameKind, Message, NodeList, ObjList, Opcode, Purge, Version, NO_ADDRESS,
};
use emp_store::ObjectKind;
use emp_tests::TestEngine;

const PEER_B: &str = "1.2.3.4:5000";

fn local_engine() -> TestEngine {
    TestEngine::new("10.0.0.1".parse().unwrap(), 4444)
}

fn non_backbone_version() -> Version {
    Version {
        version: LOCAL_VERSION,
        timestamp: Timestamp::now(),
        ip: NO_ADDRESS,
        port: 9000,
    }
}

#[test]
fn version_handshake_completes() {
    // Peer B opens with VERSION/REQUEST, then answers the reply; the
    // cascade must end with a PEER/REQUEST and no disconnect.
    let mut a = local_engine();

    a.deliver(
        Opcode::Version,
        FrameKind::Request,
        &non_backbone_version(),
        PEER_B,
    );
    let frames = a.outbound();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.opcode, Opcode::Version);
    assert_eq!(frames[0].header.kind, FrameKind::Reply);
    assert_eq!(frames[0].peer, PEER_B);
    let our_version = Version::from_bytes(&frames[0].payload).unwrap();
    assert_eq!(our_version.version, LOCAL_VERSION);

    a.deliver(
        Opcode::Version,
        FrameKind::Reply,
        &non_backbone_version(),
        PEER_B,
    );
    let frames = a.outbound();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.opcode, Opcode::Peer);
    assert_eq!(frames[0].header.kind, FrameKind::Request);

    assert!(a.kills().is_empty());
    // B broadcast the all-zero IP: never admitted to the peer table.
    assert!(a.engine.peers().is_empty());
}

#[test]
fn version_mismatch_disconnects_silently() {
    let mut a = local_engine();
    let mut version = non_backbone_version();
    version.version = 2;

    a.deliver(Opcode::Version, FrameKind::Request, &version, PEER_B);

    assert!(a.outbound().is_empty());
    assert_eq!(a.kills(), vec![PEER_B.to_string()]);
}

#[test]
fn object_gossip_pulls_unknown_hash() {
    // B advertises a hash A does not hold; A must answer with its own
    // list and fetch the unknown object, then accept the pubkey reply.
    let mut a = local_engine();
    let h = Hash::zero();

    a.deliver(
        Opcode::Obj,
        FrameKind::Request,
        &ObjList { hashes: vec![h] },
        PEER_B,
    );
    let frames = a.outbound();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].header.opcode, Opcode::Obj);
    assert_eq!(frames[0].header.kind, FrameKind::Reply);
    assert_eq!(frames[1].header.opcode, Opcode::GetObj);
    assert_eq!(frames[1].header.kind, FrameKind::Request);
    assert_eq!(frames[1].payload, h.to_bytes());

    let pubkey = EncryptedPubkey {
        addr_hash: h,
        iv: [7; 16],
        payload: vec![0xC0; 64],
    };
    a.deliver(Opcode::Pubkey, FrameKind::Reply, &pubkey, PEER_B);

    assert_eq!(a.store.contains(&h), ObjectKind::Pubkey);
    assert_eq!(a.registrations.pubkey.try_recv().unwrap(), h);
    // A reply is stored but not re-broadcast.
    assert!(a.outbound().is_empty());
}

#[test]
fn pubkey_request_satisfied_later() {
    // A pubkey request for an unknown hash is parked and re-broadcast;
    // the pubkey arriving later clears the request and propagates.
    let mut a = local_engine();
    let pubkey = EncryptedPubkey {
        addr_hash: Hash::of(b"someone"),
        iv: [1; 16],
        payload: vec![0xAB; 80],
    };

    a.deliver(
        Opcode::PubkeyRequest,
        FrameKind::Broadcast,
        &pubkey.addr_hash,
        PEER_B,
    );
    assert_eq!(
        a.store.contains(&pubkey.addr_hash),
        ObjectKind::PubkeyRequest
    );
    let frames = a.outbound();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.opcode, Opcode::PubkeyRequest);
    assert_eq!(frames[0].header.kind, FrameKind::Broadcast);
    assert_eq!(frames[0].peer, PEER_B);

    a.deliver(Opcode::Pubkey, FrameKind::Broadcast, &pubkey, "5.6.7.8:4444");
    assert_eq!(a.store.contains(&pubkey.addr_hash), ObjectKind::Pubkey);
    let frames = a.outbound();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.opcode, Opcode::Pubkey);
    assert_eq!(frames[0].header.kind, FrameKind::Broadcast);
    assert_eq!(frames[0].peer, "5.6.7.8:4444");
    assert_eq!(
        a.registrations.pubkey.try_recv().unwrap(),
        pubkey.addr_hash
    );
}

#[test]
fn send_and_purge_round_trip() {
    // The hash a sender stamps on a message must be the hash its purge
    // token resolves to, or purges can never find their messages.
    let mut a = local_engine();

    let purge = Purge {
        txid: Txid::new([0x2F; TXID_LEN]),
        signature: vec![0x55; 65],
    };
    let msg = Message {
        addr_hash: Hash::of(b"recipient"),
        txid_hash: purge.txid_hash(),
        timestamp: Timestamp::now(),
        content: vec![0x11; 48],
    };

    a.deliver(Opcode::Msg, FrameKind::Broadcast, &msg, PEER_B);
    assert_eq!(a.store.contains(&msg.txid_hash), ObjectKind::Msg);
    a.outbound();

    a.deliver(Opcode::Purge, FrameKind::Broadcast, &purge, PEER_B);
    assert_eq!(a.store.contains(&msg.txid_hash), ObjectKind::Purge);
    assert!(a.store.get_message(&msg.txid_hash).is_none());

    let frames = a.outbound();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.opcode, Opcode::Purge);
    assert_eq!(frames[0].header.kind, FrameKind::Broadcast);
    assert_eq!(a.registrations.purge.try_recv().unwrap(), purge.txid);

    // Replaying the message after the purge yields the token back.
    a.deliver(Opcode::Msg, FrameKind::Broadcast, &msg, PEER_B);
    let frames = a.outbound();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].header.opcode, Opcode::Purge);
    assert_eq!(frames[0].header.kind, FrameKind::Reply);
    assert_eq!(Purge::from_bytes(&frames[0].payload).unwrap(), purge);
}

#[test]
fn merged_peers_are_dialed_with_greeting() {
    let mut a = local_engine();
    let mut list = NodeList::new();
    list.insert(emp_proto::Node {
        ip: "9.9.9.9".parse().unwrap(),
        port: 4444,
        last_seen: Timestamp::now(),
    });
    // The local node's own address must never be merged back in.
    list.insert(emp_proto::Node {
        ip: "10.0.0.1".parse().unwrap(),
        port: 4444,
        last_seen: Timestamp::now(),
    });

    a.deliver(Opcode::Peer, FrameKind::Reply, &list, PEER_B);

    assert!(a.engine.peers().contains("9.9.9.9:4444"));
    assert!(!a.engine.peers().contains("10.0.0.1:4444"));

    let mut connects = 0;
    while let Ok(cmd) = a.peer_rx.try_recv() {
        if let emp_net::PeerCommand::Connect { addr, greeting } = cmd {
            assert_eq!(addr.to_string(), "9.9.9.9:4444");
            assert_eq!(greeting.unwrap().header.opcode, Opcode::Version);
            connects += 1;
        }
    }
    assert_eq!(connects, 1);
}
