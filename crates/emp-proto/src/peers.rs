//! Peer discovery payloads: Version handshake and node lists.
//!
//! Addresses travel as 16 bytes on the wire; IPv4 rides in the
//! v4-mapped range. The canonical peer key is the `"IP:Port"` string,
//! with v4-mapped addresses rendered in dotted form so the key agrees
//! with what the transport observes on the socket.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};

use bytes::{Bytes, BytesMut};
use emp_core::{DecodeError, Timestamp, WireDecode, WireEncode};
use serde::{Deserialize, Serialize};

/// Converts an address to its 16-byte wire form (IPv4 becomes v4-mapped).
pub fn ip_to_wire(ip: &IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

/// Converts 16 wire bytes back to an address, unmapping IPv4.
pub fn ip_from_wire(bytes: [u8; 16]) -> IpAddr {
    let v6 = Ipv6Addr::from(bytes);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

/// Canonical `"IP:Port"` key for a peer.
///
/// Normalizes through the wire form so a v4-mapped v6 address and its
/// dotted v4 form produce the same key.
pub fn peer_key(ip: IpAddr, port: u16) -> String {
    format!("{}:{}", ip_from_wire(ip_to_wire(&ip)), port)
}

/// Version handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Protocol version; must equal `LOCAL_VERSION`
    pub version: u32,
    /// Sender's clock at send time
    pub timestamp: Timestamp,
    /// Self-reported routable address, or all-zero for non-backbone nodes
    pub ip: IpAddr,
    /// Listening port
    pub port: u16,
}

impl Version {
    /// Returns true if the sender advertises a routable address.
    ///
    /// Nodes broadcasting an all-zero IP (either `::` on the wire or
    /// `0.0.0.0` in its v4-mapped form) are non-backbone and are never
    /// inserted into peer tables.
    pub fn is_backbone(&self) -> bool {
        !ip_from_wire(ip_to_wire(&self.ip)).is_unspecified()
    }
}

impl WireEncode for Version {
    fn encode(&self, buf: &mut BytesMut) {
        self.version.encode(buf);
        self.timestamp.encode(buf);
        ip_to_wire(&self.ip).encode(buf);
        self.port.encode(buf);
    }
}

impl WireDecode for Version {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            version: u32::decode(buf)?,
            timestamp: Timestamp::decode(buf)?,
            ip: ip_from_wire(<[u8; 16]>::decode(buf)?),
            port: u16::decode(buf)?,
        })
    }
}

/// A known backbone node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Routable address
    pub ip: IpAddr,
    /// Listening port
    pub port: u16,
    /// Last time this node was heard from
    pub last_seen: Timestamp,
}

impl Node {
    /// Canonical peer-table key.
    pub fn key(&self) -> String {
        peer_key(self.ip, self.port)
    }
}

impl WireEncode for Node {
    fn encode(&self, buf: &mut BytesMut) {
        ip_to_wire(&self.ip).encode(buf);
        self.port.encode(buf);
        self.last_seen.encode(buf);
    }
}

impl WireDecode for Node {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            ip: ip_from_wire(<[u8; 16]>::decode(buf)?),
            port: u16::decode(buf)?,
            last_seen: Timestamp::decode(buf)?,
        })
    }
}

/// Peer table payload: known nodes keyed by `"IP:Port"`.
///
/// Keys are unique and insertion order is irrelevant; the wire form
/// carries only the values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeList {
    /// Nodes by canonical key
    pub nodes: HashMap<String, Node>,
}

impl NodeList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node under its canonical key.
    pub fn insert(&mut self, node: Node) {
        self.nodes.insert(node.key(), node);
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.nodes.contains_key(key)
    }

    /// Number of known nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no nodes are known.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl WireEncode for NodeList {
    fn encode(&self, buf: &mut BytesMut) {
        (self.nodes.len() as u32).encode(buf);
        for node in self.nodes.values() {
            node.encode(buf);
        }
    }
}

impl WireDecode for NodeList {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let count = u32::decode(buf)? as usize;
        let mut list = NodeList::new();
        for _ in 0..count {
            list.insert(Node::decode(buf)?);
        }
        Ok(list)
    }
}

/// Marker for non-backbone nodes: the unspecified address.
pub const NO_ADDRESS: IpAddr = IpAddr::V6(Ipv6Addr::UNSPECIFIED);

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ipv4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn test_ip_wire_mapping() {
        let v4 = ipv4(10, 1, 2, 3);
        let wire = ip_to_wire(&v4);
        assert_eq!(&wire[..12], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF]);
        assert_eq!(&wire[12..], &[10, 1, 2, 3]);
        assert_eq!(ip_from_wire(wire), v4);
    }

    #[test]
    fn test_peer_key_normalizes_mapped_v4() {
        let mapped: IpAddr = "::ffff:10.1.2.3".parse().unwrap();
        assert_eq!(peer_key(mapped, 4444), "10.1.2.3:4444");
        assert_eq!(peer_key(ipv4(10, 1, 2, 3), 4444), "10.1.2.3:4444");
    }

    #[test]
    fn test_version_layout() {
        let version = Version {
            version: 1,
            timestamp: Timestamp::new(1_700_000_000),
            ip: ipv4(192, 168, 0, 1),
            port: 4444,
        };
        let bytes = version.to_vec();
        assert_eq!(bytes.len(), 4 + 8 + 16 + 2);
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(Version::from_bytes(&bytes).unwrap(), version);
    }

    #[test]
    fn test_backbone_detection() {
        let mut version = Version {
            version: 1,
            timestamp: Timestamp::new(0),
            ip: NO_ADDRESS,
            port: 4444,
        };
        assert!(!version.is_backbone());

        version.ip = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        assert!(!version.is_backbone());

        version.ip = ipv4(8, 8, 8, 8);
        assert!(version.is_backbone());
    }

    #[test]
    fn test_node_list_roundtrip() {
        let mut list = NodeList::new();
        list.insert(Node {
            ip: ipv4(10, 0, 0, 1),
            port: 4444,
            last_seen: Timestamp::new(1_700_000_000),
        });
        list.insert(Node {
            ip: ipv4(10, 0, 0, 2),
            port: 4445,
            last_seen: Timestamp::new(1_700_000_100),
        });

        let decoded = NodeList::from_bytes(&list.to_vec()).unwrap();
        assert_eq!(decoded, list);
        assert!(decoded.contains("10.0.0.1:4444"));
        assert!(decoded.contains("10.0.0.2:4445"));
    }

    #[test]
    fn test_node_list_keys_are_unique() {
        let mut list = NodeList::new();
        let node = Node {
            ip: ipv4(10, 0, 0, 1),
            port: 4444,
            last_seen: Timestamp::new(1),
        };
        list.insert(node.clone());
        list.insert(Node {
            last_seen: Timestamp::new(2),
            ..node
        });
        assert_eq!(list.len(), 1);
        assert_eq!(list.nodes["10.0.0.1:4444"].last_seen, Timestamp::new(2));
    }
}
