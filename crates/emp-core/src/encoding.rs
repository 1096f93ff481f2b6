//! Wire encoding for EMP payload types.
//!
//! Every structure that crosses the wire serializes through this trait
//! pair. The format is fixed-layout: big-endian integers, fixed-width hash
//! fields, and variable-length fields that consume the remainder of the
//! frame. There are no length prefixes below the frame header, so decoding
//! is driven entirely by field widths.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Errors during wire decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough bytes to decode
    #[error("insufficient bytes: expected {expected}, got {available}")]
    InsufficientBytes {
        /// Expected number of bytes
        expected: usize,
        /// Actually available bytes
        available: usize,
    },

    /// Unknown opcode tag
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Unknown frame kind tag
    #[error("invalid frame kind: {0}")]
    InvalidFrameKind(u8),

    /// Custom decode error
    #[error("{0}")]
    Custom(String),
}

/// Trait for types with a canonical wire serialization.
pub trait WireEncode {
    /// Encodes the value onto the buffer.
    fn encode(&self, buf: &mut BytesMut);

    /// Returns the encoded byte representation.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Returns the encoded byte representation as a Vec.
    fn to_vec(&self) -> Vec<u8> {
        self.to_bytes().to_vec()
    }
}

/// Trait for types decodable from their wire serialization.
pub trait WireDecode: Sized {
    /// Decodes from the front of the buffer, advancing it.
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError>;

    /// Decodes from a byte slice.
    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = Bytes::copy_from_slice(bytes);
        Self::decode(&mut buf)
    }
}

/// Checks that `buf` still holds at least `expected` bytes.
pub(crate) fn ensure_remaining(buf: &Bytes, expected: usize) -> Result<(), DecodeError> {
    if buf.remaining() < expected {
        return Err(DecodeError::InsufficientBytes {
            expected,
            available: buf.remaining(),
        });
    }
    Ok(())
}

impl WireEncode for u8 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }
}

impl WireDecode for u8 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, 1)?;
        Ok(buf.get_u8())
    }
}

impl WireEncode for u16 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(*self);
    }
}

impl WireDecode for u16 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, 2)?;
        Ok(buf.get_u16())
    }
}

impl WireEncode for u32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(*self);
    }
}

impl WireDecode for u32 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, 4)?;
        Ok(buf.get_u32())
    }
}

impl WireEncode for i64 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64(*self);
    }
}

impl WireDecode for i64 {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, 8)?;
        Ok(buf.get_i64())
    }
}

impl<const N: usize> WireEncode for [u8; N] {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self);
    }
}

impl<const N: usize> WireDecode for [u8; N] {
    fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        ensure_remaining(buf, N)?;
        let mut arr = [0u8; N];
        buf.copy_to_slice(&mut arr);
        Ok(arr)
    }
}
