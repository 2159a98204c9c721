//! NBT (Named Binary Tag) for Minecraft Bedrock chunk data.
//!
//! Two encodings are supported:
//! - **Little-endian**: LevelDB records and disk palettes. Ints are i32_le, string lengths u16_le.
//! - **Network**: chunk packets. Ints are ZigZag VarInt, longs ZigZag VarLong, string lengths VarUInt32.
//!
//! Compounds preserve insertion order, so decode followed by encode reproduces the input bytes.

pub mod error;
mod io;
pub mod tag;

pub use error::NbtError;
pub use tag::{NbtCompound, NbtRoot, NbtTag};

use bytes::{Buf, BufMut};

pub fn read_nbt_le(buf: &mut impl Buf) -> Result<NbtRoot, NbtError> {
    io::read_root::<io::LittleEndian>(buf)
}

pub fn write_nbt_le(buf: &mut impl BufMut, root: &NbtRoot) {
    io::write_root::<io::LittleEndian>(buf, root)
}

pub fn read_nbt_network(buf: &mut impl Buf) -> Result<NbtRoot, NbtError> {
    io::read_root::<io::Network>(buf)
}

pub fn write_nbt_network(buf: &mut impl BufMut, root: &NbtRoot) {
    io::write_root::<io::Network>(buf, root)
}

/// Read back-to-back little-endian roots until the buffer is exhausted.
///
/// Block entity and entity records in LevelDB are stored this way.
pub fn read_nbt_le_stream(buf: &mut impl Buf) -> Result<Vec<NbtRoot>, NbtError> {
    let mut roots = Vec::new();
    while buf.has_remaining() {
        roots.push(read_nbt_le(buf)?);
    }
    Ok(roots)
}

/// Read back-to-back network roots until the buffer is exhausted.
pub fn read_nbt_network_stream(buf: &mut impl Buf) -> Result<Vec<NbtRoot>, NbtError> {
    let mut roots = Vec::new();
    while buf.has_remaining() {
        roots.push(read_nbt_network(buf)?);
    }
    Ok(roots)
}
