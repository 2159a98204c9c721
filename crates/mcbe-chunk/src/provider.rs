//! Loading and saving chunk columns in a Bedrock LevelDB world.

use std::path::Path;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mcbe_nbt::{read_nbt_le_stream, write_nbt_le, NbtRoot};
use tracing::debug;

use crate::biome::ColumnBiomes;
use crate::column::{ChunkColumn, HEIGHTMAP_LEN};
use crate::error::ChunkError;
use crate::keys::{chunk_key, parse_key, sub_chunk_key, KeyData, KeyTag};
use crate::registry::BlockRegistry;
use crate::storage::{KeyValueStore, LevelDbStore};
use crate::sub_chunk::{StorageFormat, SubChunk};
use crate::version::{BiomeLayout, ChunkFormat, ChunkVersion};

/// Finalized-state value for a fully generated chunk.
const FINALIZED: i32 = 2;

/// Chunk columns for one dimension of a world.
pub struct WorldProvider<S = LevelDbStore> {
    store: S,
    dimension: i32,
    registry: Arc<BlockRegistry>,
    strict_palette_size: bool,
}

impl WorldProvider<LevelDbStore> {
    /// Open (or create) the LevelDB database at `path`.
    pub fn open(
        path: &Path,
        dimension: i32,
        registry: Arc<BlockRegistry>,
    ) -> Result<Self, ChunkError> {
        let store = LevelDbStore::open(path)?;
        Ok(Self::new(store, dimension, registry))
    }
}

impl<S: KeyValueStore> WorldProvider<S> {
    pub fn new(store: S, dimension: i32, registry: Arc<BlockRegistry>) -> Self {
        Self {
            store,
            dimension,
            registry,
            strict_palette_size: true,
        }
    }

    pub fn with_strict_palette_size(mut self, strict: bool) -> Self {
        self.strict_palette_size = strict;
        self
    }

    pub fn dimension(&self) -> i32 {
        self.dimension
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Read failures count as a missing record.
    fn read(&mut self, key: &[u8]) -> Option<Bytes> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                debug!(key = ?key, error = %e, "read failed, treating record as absent");
                None
            }
        }
    }

    fn write(&mut self, key: &[u8], value: &[u8]) -> Result<(), ChunkError> {
        Ok(self.store.put(key, value)?)
    }

    fn key(&self, x: i32, z: i32, tag: KeyTag) -> Vec<u8> {
        chunk_key(x, z, self.dimension, tag)
    }

    /// Every chunk record key in the database, across all dimensions.
    pub fn keys(&mut self) -> Result<Vec<KeyData>, ChunkError> {
        Ok(self
            .store
            .iterate()?
            .iter()
            .filter_map(|(key, _)| parse_key(key))
            .collect())
    }

    /// Stored chunk version, preferring the current key over the legacy one.
    pub fn chunk_version(&mut self, x: i32, z: i32) -> Option<ChunkVersion> {
        [KeyTag::Version, KeyTag::LegacyVersion]
            .into_iter()
            .find_map(|tag| {
                let key = self.key(x, z, tag);
                self.read(&key)
            })
            .and_then(|value| value.first().copied())
            .map(ChunkVersion)
    }

    fn format_for(&self, version: ChunkVersion) -> ChunkFormat {
        ChunkFormat::for_version(version).with_strict_palette_size(self.strict_palette_size)
    }

    /// Load a column, or `None` if it has no version record.
    ///
    /// Sub-chunks are read from the bottom up until the first missing
    /// record. With `full`, biomes, heightmap, block entities and entities
    /// are loaded too.
    pub fn load_column(
        &mut self,
        x: i32,
        z: i32,
        full: bool,
    ) -> Result<Option<ChunkColumn>, ChunkError> {
        let Some(version) = self.chunk_version(x, z) else {
            return Ok(None);
        };
        let format = self.format_for(version);
        let mut column = ChunkColumn::new(x, z, format, self.registry.clone());

        let mut sections = format.min_section..=format.max_section;
        for y in sections.by_ref() {
            let key = sub_chunk_key(x, z, self.dimension, y);
            let Some(mut data) = self.read(&key) else {
                break;
            };
            let sub = SubChunk::decode(&mut data, y, StorageFormat::Disk, &format, &self.registry)?;
            column.set_section(sub)?;
        }
        // anything stored above the first hole means the stack is broken
        let first_missing = format.min_section as i32 + column.section_count() as i32;
        for y in sections {
            let key = sub_chunk_key(x, z, self.dimension, y);
            if self.read(&key).is_some() {
                return Err(ChunkError::SectionGap { y: first_missing });
            }
        }

        if full {
            for root in self.read_block_entities(x, z)? {
                column.add_block_entity(root)?;
            }
            for root in self.read_entities(x, z)? {
                column.add_entity(root);
            }
            if let Some((heightmap, biomes)) = self.read_biomes_and_elevation(x, z, &format)? {
                column.set_heightmap(heightmap);
                column.set_biomes(biomes);
            }
        }

        debug!(
            x,
            z,
            dimension = self.dimension,
            version = %version,
            sections = column.section_count(),
            "loaded chunk"
        );
        Ok(Some(column))
    }

    /// Write every record of a column. Sub-chunk records above the stack are removed.
    pub fn save_column(&mut self, column: &ChunkColumn) -> Result<(), ChunkError> {
        let (x, z) = (column.x(), column.z());
        let format = *column.format();

        self.write(&self.key(x, z, KeyTag::Version), &[format.version.0])?;

        let mut count = 0;
        for sub in column.stack()? {
            let key = sub_chunk_key(x, z, self.dimension, sub.y());
            self.write(&key, &sub.to_bytes(StorageFormat::Disk)?)?;
            count += 1;
        }
        for y in format.min_section as i32 + count..=format.max_section as i32 {
            let key = sub_chunk_key(x, z, self.dimension, y as i8);
            self.store.delete(&key)?;
        }

        let mut data = BytesMut::with_capacity(HEIGHTMAP_LEN * 2);
        for &height in column.heightmap() {
            data.put_i16_le(height);
        }
        column
            .biomes()
            .encode(&format, StorageFormat::Disk, &mut data)?;
        let tag = match format.biome_layout {
            BiomeLayout::Paletted3D => KeyTag::Data3D,
            BiomeLayout::Legacy2D => KeyTag::Data2D,
        };
        self.write(&self.key(x, z, tag), &data)?;

        self.write_nbt_records(x, z, KeyTag::BlockEntity, column.block_entities())?;
        self.write_nbt_records(x, z, KeyTag::Entity, column.entities().iter())?;

        self.write(
            &self.key(x, z, KeyTag::FinalizedState),
            &FINALIZED.to_le_bytes(),
        )?;
        debug!(x, z, dimension = self.dimension, sections = count, "saved chunk");
        Ok(())
    }

    /// Concatenated little-endian roots; an empty list removes the record.
    fn write_nbt_records<'a>(
        &mut self,
        x: i32,
        z: i32,
        tag: KeyTag,
        roots: impl Iterator<Item = &'a NbtRoot>,
    ) -> Result<(), ChunkError> {
        let key = self.key(x, z, tag);
        let mut data = BytesMut::new();
        for root in roots {
            write_nbt_le(&mut data, root);
        }
        if data.is_empty() {
            self.store.delete(&key)?;
            Ok(())
        } else {
            self.write(&key, &data)
        }
    }

    fn read_nbt_records(
        &mut self,
        x: i32,
        z: i32,
        tag: KeyTag,
        context: &'static str,
    ) -> Result<Vec<NbtRoot>, ChunkError> {
        let key = self.key(x, z, tag);
        match self.read(&key) {
            Some(mut data) => read_nbt_le_stream(&mut data).map_err(ChunkError::nbt(context)),
            None => Ok(Vec::new()),
        }
    }

    /// Raw border block record, if any.
    pub fn read_border_blocks(&mut self, x: i32, z: i32) -> Option<Bytes> {
        let key = self.key(x, z, KeyTag::BorderBlocks);
        self.read(&key)
    }

    pub fn read_entities(&mut self, x: i32, z: i32) -> Result<Vec<NbtRoot>, ChunkError> {
        self.read_nbt_records(x, z, KeyTag::Entity, "entity")
    }

    pub fn read_block_entities(&mut self, x: i32, z: i32) -> Result<Vec<NbtRoot>, ChunkError> {
        self.read_nbt_records(x, z, KeyTag::BlockEntity, "block entity")
    }

    /// Heightmap and biomes from the Data3D or Data2D record.
    pub fn read_biomes_and_elevation(
        &mut self,
        x: i32,
        z: i32,
        format: &ChunkFormat,
    ) -> Result<Option<([i16; HEIGHTMAP_LEN], ColumnBiomes)>, ChunkError> {
        let tag = match format.biome_layout {
            BiomeLayout::Paletted3D => KeyTag::Data3D,
            BiomeLayout::Legacy2D => KeyTag::Data2D,
        };
        let key = self.key(x, z, tag);
        let Some(mut data) = self.read(&key) else {
            return Ok(None);
        };
        mcbe_proto::codec::ensure_remaining(&data, HEIGHTMAP_LEN * 2)?;
        let mut heightmap = [0i16; HEIGHTMAP_LEN];
        for height in &mut heightmap {
            *height = data.get_i16_le();
        }
        let biomes = ColumnBiomes::decode(&mut data, format, StorageFormat::Disk, false)?;
        Ok(Some((heightmap, biomes)))
    }

    pub fn flush(&mut self) -> Result<(), ChunkError> {
        Ok(self.store.flush()?)
    }

    /// Flush and hand back the store.
    pub fn close(mut self) -> Result<S, ChunkError> {
        self.flush()?;
        Ok(self.store)
    }
}
