//! Variable-length integers and block/chunk coordinates.

use std::fmt;

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::codec::{ProtoDecode, ProtoEncode};
use crate::error::ProtoError;

#[derive(Debug, Error)]
pub enum VarIntError {
    #[error("buffer too short")]
    BufferTooShort,
    #[error("VarInt is too long (more than {max_bytes} bytes)")]
    TooManyBytes { max_bytes: usize },
}

// ---------------------------------------------------------------------------
// LEB128 core
// ---------------------------------------------------------------------------

#[inline]
fn write_leb128(buf: &mut impl BufMut, mut value: u64) {
    loop {
        if value & !0x7F == 0 {
            buf.put_u8(value as u8);
            return;
        }
        buf.put_u8((value & 0x7F | 0x80) as u8);
        value >>= 7;
    }
}

fn read_leb128(buf: &mut impl Buf, max_bytes: usize) -> Result<u64, VarIntError> {
    let mut result: u64 = 0;
    for i in 0..max_bytes {
        if !buf.has_remaining() {
            return Err(VarIntError::BufferTooShort);
        }
        let byte = buf.get_u8();
        result |= ((byte & 0x7F) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(VarIntError::TooManyBytes { max_bytes })
}

#[inline]
fn zigzag_encode_32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

#[inline]
fn zigzag_decode_32(v: u32) -> i32 {
    (v >> 1) as i32 ^ -((v & 1) as i32)
}

#[inline]
fn zigzag_encode_64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
fn zigzag_decode_64(v: u64) -> i64 {
    (v >> 1) as i64 ^ -((v & 1) as i64)
}

// ---------------------------------------------------------------------------
// VarInt (i32, ZigZag)
// ---------------------------------------------------------------------------

/// Signed 32-bit ZigZag VarInt. Runtime palette entries and network NBT ints use it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarInt(pub i32);

impl VarInt {
    pub const MAX_BYTES: usize = 5;
}

impl ProtoEncode for VarInt {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        write_leb128(buf, zigzag_encode_32(self.0) as u64);
    }
}

impl ProtoDecode for VarInt {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        let raw = read_leb128(buf, Self::MAX_BYTES)?;
        Ok(VarInt(zigzag_decode_32(raw as u32)))
    }
}

impl From<i32> for VarInt {
    fn from(v: i32) -> Self {
        VarInt(v)
    }
}

impl From<VarInt> for i32 {
    fn from(v: VarInt) -> Self {
        v.0
    }
}

impl fmt::Debug for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarInt({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// VarLong (i64, ZigZag)
// ---------------------------------------------------------------------------

/// Signed 64-bit ZigZag VarLong. Network NBT longs use it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarLong(pub i64);

impl VarLong {
    pub const MAX_BYTES: usize = 10;
}

impl ProtoEncode for VarLong {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        write_leb128(buf, zigzag_encode_64(self.0));
    }
}

impl ProtoDecode for VarLong {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        let raw = read_leb128(buf, Self::MAX_BYTES)?;
        Ok(VarLong(zigzag_decode_64(raw)))
    }
}

impl fmt::Debug for VarLong {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarLong({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// VarUInt32 (plain LEB128)
// ---------------------------------------------------------------------------

/// Unsigned LEB128, no ZigZag. String lengths and palette counts.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarUInt32(pub u32);

impl VarUInt32 {
    pub const MAX_BYTES: usize = 5;
}

impl ProtoEncode for VarUInt32 {
    fn proto_encode(&self, buf: &mut impl BufMut) {
        write_leb128(buf, self.0 as u64);
    }
}

impl ProtoDecode for VarUInt32 {
    fn proto_decode(buf: &mut impl Buf) -> Result<Self, ProtoError> {
        Ok(VarUInt32(read_leb128(buf, Self::MAX_BYTES)? as u32))
    }
}

impl From<u32> for VarUInt32 {
    fn from(v: u32) -> Self {
        VarUInt32(v)
    }
}

impl fmt::Debug for VarUInt32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarUInt32({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// World block position. Ordered x, then y, then z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Index of the 16-block section containing this block.
    pub fn section_y(&self) -> i32 {
        self.y >> 4
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Chunk column position (block coordinates divided by 16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encoded(v: impl ProtoEncode) -> Vec<u8> {
        let mut buf = BytesMut::new();
        v.proto_encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn varint_zigzag_bytes() {
        assert_eq!(encoded(VarInt(0)), [0x00]);
        assert_eq!(encoded(VarInt(-1)), [0x01]);
        assert_eq!(encoded(VarInt(1)), [0x02]);
        assert_eq!(encoded(VarInt(64)), [0x80, 0x01]);
    }

    #[test]
    fn varint_extremes_roundtrip() {
        for value in [i32::MIN, -300, -1, 0, 1, 300, i32::MAX] {
            let bytes = encoded(VarInt(value));
            assert!(bytes.len() <= VarInt::MAX_BYTES);
            let decoded = VarInt::proto_decode(&mut &bytes[..]).unwrap();
            assert_eq!(decoded.0, value);
        }
    }

    #[test]
    fn varuint32_not_zigzag() {
        assert_eq!(encoded(VarUInt32(1)), [0x01]);
        assert_eq!(encoded(VarUInt32(300)), [0xAC, 0x02]);
    }

    #[test]
    fn varlong_zigzag_full_width() {
        assert_eq!(encoded(VarLong(-1)), [0x01]);
        assert_eq!(encoded(VarLong(1)), [0x02]);
        for value in [i64::MIN, -1 << 40, 0, 1 << 40, i64::MAX] {
            let bytes = encoded(VarLong(value));
            assert!(bytes.len() <= VarLong::MAX_BYTES);
            assert_eq!(VarLong::proto_decode(&mut &bytes[..]).unwrap().0, value);
        }
        assert_eq!(encoded(VarLong(i64::MIN)).len(), 10);
    }

    #[test]
    fn varint_truncated() {
        assert!(matches!(
            VarInt::proto_decode(&mut &[0x80u8][..]),
            Err(ProtoError::VarInt(VarIntError::BufferTooShort))
        ));
    }

    #[test]
    fn varint_too_long() {
        let data = [0xFFu8; 6];
        assert!(matches!(
            VarUInt32::proto_decode(&mut &data[..]),
            Err(ProtoError::VarInt(VarIntError::TooManyBytes { max_bytes: 5 }))
        ));
    }

    #[test]
    fn blockpos_section() {
        assert_eq!(BlockPos::new(0, -64, 0).section_y(), -4);
        assert_eq!(BlockPos::new(0, -1, 0).section_y(), -1);
        assert_eq!(BlockPos::new(0, 16, 0).section_y(), 1);
    }

    #[test]
    fn blockpos_ordering() {
        let mut positions = vec![
            BlockPos::new(1, 0, 0),
            BlockPos::new(0, 5, 0),
            BlockPos::new(0, 0, 9),
        ];
        positions.sort();
        assert_eq!(positions[0], BlockPos::new(0, 0, 9));
        assert_eq!(positions[2], BlockPos::new(1, 0, 0));
    }

    #[test]
    fn positions_display() {
        assert_eq!(BlockPos::new(1, -2, 3).to_string(), "(1, -2, 3)");
        assert_eq!(ChunkPos::new(-1, 4).to_string(), "(-1, 4)");
    }
}
