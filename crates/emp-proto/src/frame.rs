//! Frame header, opcodes, and frame kinds.
//!
//! A frame on the wire is a 6-byte header (opcode, kind, payload length)
//! followed by exactly `length` payload bytes. The transport delivers whole
//! frames in order per peer; the payload stays opaque until the engine
//! decodes it for the opcode at hand.

use bytes::{Bytes, BytesMut};
use emp_core::{DecodeError, WireDecode, WireEncode, FRAME_HEADER_LEN};
use serde::{Deserialize, Serialize};

/// Protocol opcodes, numbered in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// Version handshake
    Version = 0,
    /// Peer list exchange
    Peer = 1,
    /// Object hash list exchange
    Obj = 2,
    /// Object fetch by hash
    GetObj = 3,
    /// Public key request broadcast
    PubkeyRequest = 4,
    /// Encrypted public key broadcast
    Pubkey = 5,
    /// Direct message broadcast
    Msg = 6,
    /// Purge token broadcast
    Purge = 7,
    /// Purge lookup for a message hash
    CheckTxid = 8,
    /// Publication broadcast
    Pub = 9,
}

impl Opcode {
    /// Returns the wire tag.
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Creates from a wire tag.
    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(Opcode::Version),
            1 => Ok(Opcode::Peer),
            2 => Ok(Opcode::Obj),
            3 => Ok(Opcode::GetObj),
            4 => Ok(Opcode::PubkeyRequest),
            5 => Ok(Opcode::Pubkey),
            6 => Ok(Opcode::Msg),
            7 => Ok(Opcode::Purge),
            8 => Ok(Opcode::CheckTxid),
            9 => Ok(Opcode::Pub),
            _ => Err(DecodeError::InvalidOpcode(tag)),
        }
    }

    /// Returns true for opcodes that are never legal as a BROADCAST.
    ///
    /// Receiving one broadcast is a disconnect offence.
    pub fn unicast_only(&self) -> bool {
        matches!(
            self,
            Opcode::Version | Opcode::Peer | Opcode::Obj | Opcode::GetObj | Opcode::CheckTxid
        )
    }
}

/// Frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameKind {
    /// Propagate to all peers except the sender
    Broadcast = 0,
    /// Unicast request
    Request = 1,
    /// Unicast reply
    Reply = 2,
}

impl FrameKind {
    /// Returns the wire tag.
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Creates from a wire tag.
    pub fn from_tag(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0 => Ok(FrameKind::Broadcast),
            1 => Ok(FrameKind::Request),
            2 => Ok(FrameKind::Reply),
            _ => Err(DecodeError::InvalidFrameKind(tag)),
        }
    }
}

/// Frame header: opcode, kind, payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Payload opcode
    pub opcode: Opcode,
    /// Broadcast, request, or reply
    pub kind: FrameKind,
    /// Payload length in bytes
    pub length: u32,
}

impl WireEncode for Header {
    fn encode(&self, buf: &mut BytesMut) {
        self.opcode.tag().encode(buf);
        self.kind.tag().encode(buf);
        self.length.encode(buf);
    }
}

impl WireDecode for Header {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            opcode: Opcode::from_tag(u8::decode(buf)?)?,
            kind: FrameKind::from_tag(u8::decode(buf)?)?,
            length: u32::decode(buf)?,
        })
    }
}

/// A framed payload tagged with its peer of origin (or destination).
///
/// `peer` is the canonical `"IP:Port"` key of the connection a frame
/// arrived on. Outbound, it names the unicast destination; for broadcasts
/// it names the source to exclude from fan-out. The empty string marks a
/// locally injected frame, which fans out to every peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header
    pub header: Header,
    /// Undecoded payload bytes
    pub payload: Bytes,
    /// Canonical peer key, or "" for local origin
    pub peer: String,
}

impl Frame {
    /// Builds a frame around a payload value.
    ///
    /// The peer key starts empty; the engine fills it in before queueing
    /// the frame for the transport.
    pub fn build<P: WireEncode>(opcode: Opcode, kind: FrameKind, payload: &P) -> Self {
        let payload = payload.to_bytes();
        Self {
            header: Header {
                opcode,
                kind,
                length: payload.len() as u32,
            },
            payload,
            peer: String::new(),
        }
    }

    /// Builds a frame addressed to `peer`.
    pub fn to_peer<P: WireEncode>(
        opcode: Opcode,
        kind: FrameKind,
        payload: &P,
        peer: impl Into<String>,
    ) -> Self {
        let mut frame = Self::build(opcode, kind, payload);
        frame.peer = peer.into();
        frame
    }

    /// Serializes header and payload for the wire.
    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}
