//! Encoding/decoding traits and checked little-endian readers.

use bytes::{Buf, BufMut};

use crate::error::ProtoError;

/// Encode a value onto a buffer.
pub trait ProtoEncode {
    fn proto_encode(&self, buf: &mut impl BufMut);
}

/// Decode a value from a buffer.
pub trait ProtoDecode: Sized {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError>;
}

/// Fail with [`ProtoError::BufferTooShort`] unless `needed` bytes remain.
pub fn ensure_remaining(buf: &impl Buf, needed: usize) -> Result<(), ProtoError> {
    if buf.remaining() < needed {
        Err(ProtoError::BufferTooShort {
            needed,
            remaining: buf.remaining(),
        })
    } else {
        Ok(())
    }
}

pub fn read_u8(buf: &mut impl Buf) -> Result<u8, ProtoError> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn read_i8(buf: &mut impl Buf) -> Result<i8, ProtoError> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_i8())
}

pub fn read_i32_le(buf: &mut impl Buf) -> Result<i32, ProtoError> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_i32_le())
}

/// Read exactly `len` bytes.
pub fn read_bytes(buf: &mut impl Buf, len: usize) -> Result<bytes::Bytes, ProtoError> {
    ensure_remaining(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}
