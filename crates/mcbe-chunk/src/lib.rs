//! Bedrock chunk columns: paletted sub-chunks, biomes, the blob cache and LevelDB storage.

pub mod biome;
pub mod bit_array;
pub mod blob_store;
pub mod column;
pub mod config;
pub mod error;
pub mod hash;
pub mod keys;
pub mod palette;
pub mod provider;
pub mod registry;
pub mod storage;
pub mod sub_chunk;
pub mod version;

pub use biome::{BiomeSection, ColumnBiomes};
pub use bit_array::BitArray;
pub use blob_store::{BlobEntry, BlobHash, BlobKind, BlobPosition, BlobStore, CachedBlob};
pub use column::{ChunkColumn, SectionCount};
pub use config::ChunkConfig;
pub use error::{ChunkError, StorageError};
pub use keys::{KeyData, KeyTag};
pub use palette::{Palette, PaletteEntry};
pub use provider::WorldProvider;
pub use registry::{BlockRegistry, BlockState};
pub use storage::{KeyValueStore, LevelDbStore, MemoryStore};
pub use sub_chunk::{StorageFormat, SubChunk};
pub use version::{ChunkFormat, ChunkVersion};
