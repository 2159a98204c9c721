//! Chunk codec and storage errors.

use mcbe_nbt::NbtError;
use mcbe_proto::ProtoError;
use thiserror::Error;

use crate::sub_chunk::StorageFormat;

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid bits per entry: {0}")]
    InvalidBitsPerEntry(u8),

    #[error("invalid palette size {size} (sub-chunk y={y}, layer {layer})")]
    InvalidPaletteSize { y: i32, layer: usize, size: i64 },

    #[error("palette size mismatch: declared {expected}, read {actual} (sub-chunk y={y}, layer {layer})")]
    PaletteSizeMismatch {
        y: i32,
        layer: usize,
        expected: usize,
        actual: usize,
    },

    #[error("palette index {index} out of bounds for palette of {len} (sub-chunk y={y}, layer {layer})")]
    PaletteOutOfBounds {
        y: i32,
        layer: usize,
        index: u32,
        len: usize,
    },

    #[error("expected {expected:?} palette framing (sub-chunk y={y}, layer {layer})")]
    FramingMismatch {
        y: i32,
        layer: usize,
        expected: StorageFormat,
    },

    #[error("unsupported sub-chunk version {version} (y={y})")]
    UnsupportedSubChunkVersion { y: i32, version: u8 },

    #[error("biome section y={y} copies a section that does not exist")]
    NoPreviousBiomes { y: i32 },

    #[error("unknown block state {name}")]
    UnknownBlockState { name: String },

    #[error("unknown runtime id {0}")]
    UnknownRuntimeId(u32),

    #[error("unknown chunk version {0}")]
    UnknownChunkVersion(String),

    #[error("nbt ({context}): {source}")]
    Nbt {
        context: &'static str,
        #[source]
        source: NbtError,
    },

    #[error(transparent)]
    Proto(#[from] ProtoError),

    #[error("{0} border blocks present, only 0 is supported")]
    BorderBlocks(u32),

    #[error("gap in sub-chunk stack at y={y}")]
    SectionGap { y: i32 },

    #[error("sub-chunk y={y} appears twice")]
    DuplicateSection { y: i32 },

    #[error("sub-chunk y={y} is outside the column")]
    SectionOutOfRange { y: i32 },

    #[error("no sub-chunk at y={y}")]
    MissingSection { y: i32 },

    #[error("block entity is missing integer x/y/z")]
    BlockEntityPosition,

    #[error("block registry: {0}")]
    Registry(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ChunkError {
    pub(crate) fn nbt(context: &'static str) -> impl FnOnce(NbtError) -> Self {
        move |source| ChunkError::Nbt { context, source }
    }
}

/// Failure reported by a [`KeyValueStore`](crate::storage::KeyValueStore) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("read failed: {0}")]
    Read(String),
}
