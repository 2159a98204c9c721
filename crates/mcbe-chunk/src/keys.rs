//! LevelDB key layout for Bedrock worlds.
//!
//! ```text
//! overworld:  [x i32_le][z i32_le][tag]            (9 bytes)
//! other dims: [x i32_le][z i32_le][dim i32_le][tag] (13 bytes)
//! ```
//!
//! Sub-chunk records append the section index as one signed byte.

use std::fmt;

/// Record discriminator byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyTag {
    /// 512-byte heightmap followed by 3-D biome sections.
    Data3D = 43,
    Version = 44,
    /// 512-byte heightmap followed by 256 biome bytes.
    Data2D = 45,
    Data2DLegacy = 46,
    SubChunkPrefix = 47,
    LegacyTerrain = 48,
    BlockEntity = 49,
    Entity = 50,
    PendingTicks = 51,
    BlockExtraData = 52,
    BiomeState = 53,
    FinalizedState = 54,
    BorderBlocks = 56,
    HardCodedSpawnAreas = 57,
    Checksums = 59,
    /// Version key written before 1.16.100.
    LegacyVersion = 118,
}

impl KeyTag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            43 => KeyTag::Data3D,
            44 => KeyTag::Version,
            45 => KeyTag::Data2D,
            46 => KeyTag::Data2DLegacy,
            47 => KeyTag::SubChunkPrefix,
            48 => KeyTag::LegacyTerrain,
            49 => KeyTag::BlockEntity,
            50 => KeyTag::Entity,
            51 => KeyTag::PendingTicks,
            52 => KeyTag::BlockExtraData,
            53 => KeyTag::BiomeState,
            54 => KeyTag::FinalizedState,
            56 => KeyTag::BorderBlocks,
            57 => KeyTag::HardCodedSpawnAreas,
            59 => KeyTag::Checksums,
            118 => KeyTag::LegacyVersion,
            _ => return None,
        })
    }
}

/// Build a chunk record key. The dimension is omitted for the overworld (0).
pub fn chunk_key(x: i32, z: i32, dimension: i32, tag: KeyTag) -> Vec<u8> {
    let mut key = Vec::with_capacity(if dimension == 0 { 9 } else { 13 });
    key.extend_from_slice(&x.to_le_bytes());
    key.extend_from_slice(&z.to_le_bytes());
    if dimension != 0 {
        key.extend_from_slice(&dimension.to_le_bytes());
    }
    key.push(tag as u8);
    key
}

pub fn sub_chunk_key(x: i32, z: i32, dimension: i32, y: i8) -> Vec<u8> {
    let mut key = chunk_key(x, z, dimension, KeyTag::SubChunkPrefix);
    key.push(y as u8);
    key
}

/// A decoded chunk record key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyData {
    pub x: i32,
    pub z: i32,
    pub dimension: i32,
    pub tag: KeyTag,
    /// Section index, for sub-chunk records only.
    pub y: Option<i8>,
}

impl fmt::Display for KeyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) dim {} {:?}", self.x, self.z, self.dimension, self.tag)?;
        if let Some(y) = self.y {
            write!(f, " y={y}")?;
        }
        Ok(())
    }
}

fn le_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Recover the coordinates and tag of a chunk key.
///
/// Returns `None` for keys that are not chunk records (player data,
/// `~local_player`, villages and so on).
pub fn parse_key(key: &[u8]) -> Option<KeyData> {
    let (dimension, tag_at) = match key.len() {
        9 | 10 => (0, 8),
        13 | 14 => (le_i32(&key[8..12]), 12),
        _ => return None,
    };
    let tag = KeyTag::from_byte(key[tag_at])?;
    let y = match (tag, key.len() - tag_at) {
        (KeyTag::SubChunkPrefix, 2) => Some(key[tag_at + 1] as i8),
        (_, 1) => None,
        _ => return None,
    };
    Some(KeyData {
        x: le_i32(&key[0..4]),
        z: le_i32(&key[4..8]),
        dimension,
        tag,
        y,
    })
}
