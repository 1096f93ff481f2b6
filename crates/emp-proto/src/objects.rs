//! Gossip object payloads.
//!
//! The replicated units of the overlay: encrypted pubkeys, direct
//! messages, publications (which share the `Message` layout), purge
//! tokens, and the hash lists exchanged during object sync. Variable
//! fields consume the remainder of the frame, so none of these carry an
//! inner length prefix.

use bytes::{Buf, Bytes, BytesMut};
use emp_core::{
    DecodeError, Hash, Timestamp, Txid, WireDecode, WireEncode, HASH_LEN, IV_LEN, TXID_LEN,
};
use serde::{Deserialize, Serialize};

/// Minimum wire length of a message: two hashes and a timestamp.
pub const MSG_MIN_LEN: usize = 2 * HASH_LEN + 8;

/// An encrypted public key, addressed by the hash of its owner's address.
///
/// Stored and relayed as `IV ∥ payload`; only the address owner can
/// decrypt it out-of-band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPubkey {
    /// Hash of the owning address
    pub addr_hash: Hash,
    /// Cipher initialization vector
    pub iv: [u8; IV_LEN],
    /// Encrypted key material, remainder of the frame
    pub payload: Vec<u8>,
}

impl WireEncode for EncryptedPubkey {
    fn encode(&self, buf: &mut BytesMut) {
        self.addr_hash.encode(buf);
        self.iv.encode(buf);
        buf.extend_from_slice(&self.payload);
    }
}

impl WireDecode for EncryptedPubkey {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            addr_hash: Hash::decode(buf)?,
            iv: <[u8; IV_LEN]>::decode(buf)?,
            payload: buf.copy_to_bytes(buf.remaining()).to_vec(),
        })
    }
}

/// A direct message or publication.
///
/// The timestamp records first-broadcast time and is never rewritten on
/// replay. `content` is the opaque encrypted body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Hash of the recipient's address
    pub addr_hash: Hash,
    /// Content-address of the message, shared with its purge token
    pub txid_hash: Hash,
    /// First-broadcast time
    pub timestamp: Timestamp,
    /// Encrypted body, remainder of the frame
    pub content: Vec<u8>,
}

impl WireEncode for Message {
    fn encode(&self, buf: &mut BytesMut) {
        self.addr_hash.encode(buf);
        self.txid_hash.encode(buf);
        self.timestamp.encode(buf);
        buf.extend_from_slice(&self.content);
    }
}

impl WireDecode for Message {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        if buf.remaining() < MSG_MIN_LEN {
            return Err(DecodeError::InsufficientBytes {
                expected: MSG_MIN_LEN,
                available: buf.remaining(),
            });
        }
        Ok(Self {
            addr_hash: Hash::decode(buf)?,
            txid_hash: Hash::decode(buf)?,
            timestamp: Timestamp::decode(buf)?,
            content: buf.copy_to_bytes(buf.remaining()).to_vec(),
        })
    }
}

/// An authenticated purge token.
///
/// Revealing the txid preimage plus its signature deletes the matching
/// message from every compliant node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purge {
    /// Random transaction id, the purge preimage
    pub txid: Txid,
    /// Signature bytes, remainder of the frame
    pub signature: Vec<u8>,
}

impl Purge {
    /// Content-address of this purge and of the message it deletes.
    ///
    /// SHA-384 over the token's wire serialization (`Txid ∥ Signature`).
    /// Senders derive a message's `TxidHash` with this same function, so
    /// a purge resolves to exactly the row it supersedes. Interop depends
    /// on this agreeing byte-for-byte across implementations.
    pub fn txid_hash(&self) -> Hash {
        Hash::of(&self.to_vec())
    }
}

impl WireEncode for Purge {
    fn encode(&self, buf: &mut BytesMut) {
        self.txid.encode(buf);
        buf.extend_from_slice(&self.signature);
    }
}

impl WireDecode for Purge {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        if buf.remaining() < TXID_LEN {
            return Err(DecodeError::InsufficientBytes {
                expected: TXID_LEN,
                available: buf.remaining(),
            });
        }
        Ok(Self {
            txid: Txid::decode(buf)?,
            signature: buf.copy_to_bytes(buf.remaining()).to_vec(),
        })
    }
}

/// Object hash list exchanged during sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjList {
    /// Hashes of every held object
    pub hashes: Vec<Hash>,
}

impl WireEncode for ObjList {
    fn encode(&self, buf: &mut BytesMut) {
        (self.hashes.len() as u32).encode(buf);
        for hash in &self.hashes {
            hash.encode(buf);
        }
    }
}

impl WireDecode for ObjList {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let count = u32::decode(buf)? as usize;
        let mut hashes = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            hashes.push(Hash::decode(buf)?);
        }
        Ok(Self { hashes })
    }
}

/// The empty payload, used for not-found replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NilPayload;

impl WireEncode for NilPayload {
    fn encode(&self, _buf: &mut BytesMut) {}
}

impl WireDecode for NilPayload {
    fn decode(_buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(NilPayload)
    }
}
