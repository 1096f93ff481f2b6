//! Object hashes and transaction identifiers.
//!
//! Every replicated object is content-addressed by the SHA-384 of its wire
//! serialization. The 48-byte digest doubles as the store lookup key, so
//! equality is byte equality and nothing else.

use std::fmt;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384};

use crate::encoding::{DecodeError, WireDecode, WireEncode};

/// Length of an object hash in bytes.
pub const HASH_LEN: usize = 48;

/// Length of a transaction id in bytes.
pub const TXID_LEN: usize = 16;

/// Computes the SHA-384 digest of `data`.
pub fn sha384(data: &[u8]) -> [u8; HASH_LEN] {
    let digest = Sha384::digest(data);
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest);
    out
}

/// 48-byte SHA-384 content hash.
///
/// Identifies pubkeys, pubkey requests, messages, publications, and purge
/// tokens throughout the gossip overlay.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Default for Hash {
    fn default() -> Self {
        Self([0u8; HASH_LEN])
    }
}

// `serde`'s blanket array impls only cover lengths up to 32, so `HASH_LEN`
// (48) needs a hand-written impl equivalent to what the derive would
// generate if it could.
impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeTuple;
        let mut tup = serializer.serialize_tuple(HASH_LEN)?;
        for byte in &self.0 {
            tup.serialize_element(byte)?;
        }
        tup.end()
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct HashVisitor;

        impl<'de> serde::de::Visitor<'de> for HashVisitor {
            type Value = Hash;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "an array of length {}", HASH_LEN)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut bytes = [0u8; HASH_LEN];
                for (i, slot) in bytes.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
                }
                Ok(Hash(bytes))
            }
        }

        deserializer.deserialize_tuple(HASH_LEN, HashVisitor)
    }
}

impl Hash {
    /// Creates a hash from a 48-byte array.
    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Creates the all-zero hash.
    pub const fn zero() -> Self {
        Self([0u8; HASH_LEN])
    }

    /// Computes the hash of a byte serialization.
    pub fn of(data: &[u8]) -> Self {
        Self(sha384(data))
    }

    /// Returns the inner bytes.
    pub const fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Returns the inner bytes as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Creates from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != HASH_LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Returns as a hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl WireEncode for Hash {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}

impl WireDecode for Hash {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self(<[u8; HASH_LEN]>::decode(buf)?))
    }
}

/// 16-byte random transaction id.
///
/// The preimage half of a purge token: revealing it (with the purge
/// signature) proves the right to delete the matching message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Txid(pub [u8; TXID_LEN]);

impl Txid {
    /// Creates a txid from a 16-byte array.
    pub const fn new(bytes: [u8; TXID_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the inner bytes.
    pub const fn as_bytes(&self) -> &[u8; TXID_LEN] {
        &self.0
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Txid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl WireEncode for Txid {
    fn encode(&self, buf: &mut BytesMut) {
        self.0.encode(buf);
    }
}

impl WireDecode for Txid {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self(<[u8; TXID_LEN]>::decode(buf)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha384_empty() {
        // SHA-384 of the empty string.
        let hash = Hash::of(b"");
        assert_eq!(
            hash.to_hex(),
            "38b060a751ac96384cd9327eb1b1e36a21fdb71114be07434c0cc7bf63f6e1da\
             274edebfe76f65fbd51ad2f14898b95b"
        );
    }

    #[test]
    fn test_hash_is_wire_width() {
        let hash = Hash::of(b"gossip");
        assert_eq!(hash.to_vec().len(), HASH_LEN);
        assert_eq!(Hash::from_bytes(&hash.to_vec()).unwrap(), hash);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(Hash::from_hex("deadbeef").is_err());
    }

    #[test]
    fn test_txid_roundtrip() {
        let txid = Txid::new([0x5A; TXID_LEN]);
        assert_eq!(Txid::from_bytes(&txid.to_vec()).unwrap(), txid);
    }

    #[test]
    fn test_equality_is_byte_equality() {
        let a = Hash::of(b"a");
        let b = Hash::of(b"a");
        let c = Hash::of(b"b");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
