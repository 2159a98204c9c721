//! Chunk columns and their network encodings.
//!
//! A column owns the vertical stack of sub-chunks for one (x, z) position,
//! plus biomes, the heightmap, block entities and entities. The stack is
//! indexed from the format's lowest section and may only be absent as a
//! trailing run.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mcbe_nbt::{read_nbt_network_stream, write_nbt_network, NbtRoot, NbtTag};
use mcbe_proto::codec::read_u8;
use mcbe_proto::{BlockPos, ChunkPos, ProtoDecode, ProtoEncode, VarUInt32};
use tracing::{debug, trace};

use crate::biome::ColumnBiomes;
use crate::blob_store::{BlobEntry, BlobHash, BlobKind, BlobPosition, BlobStore, CachedBlob};
use crate::error::ChunkError;
use crate::hash::blob_checksum;
use crate::registry::BlockRegistry;
use crate::sub_chunk::{StorageFormat, SubChunk};
use crate::version::{BorderEncoding, ChunkFormat};

/// Width of the heightmap, one entry per (x, z), index `x * 16 + z`.
pub const HEIGHTMAP_LEN: usize = 256;

/// How many sub-chunks precede the biomes in a no-cache payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionCount {
    Count(usize),
    /// Sub-chunks are requested separately; the payload holds biomes only.
    BiomesOnly,
}

#[derive(Debug, Clone)]
pub struct ChunkColumn {
    x: i32,
    z: i32,
    format: ChunkFormat,
    registry: Arc<BlockRegistry>,
    sections: Vec<Option<SubChunk>>,
    biomes: ColumnBiomes,
    biomes_updated: bool,
    biomes_hash: Option<BlobHash>,
    heightmap: [i16; HEIGHTMAP_LEN],
    block_entities: BTreeMap<BlockPos, NbtRoot>,
    entities: Vec<NbtRoot>,
}

/// World position stored in a block entity's `x`, `y`, `z` ints.
pub fn block_entity_pos(root: &NbtRoot) -> Result<BlockPos, ChunkError> {
    match (root.get_int("x"), root.get_int("y"), root.get_int("z")) {
        (Some(x), Some(y), Some(z)) => Ok(BlockPos::new(x, y, z)),
        _ => Err(ChunkError::BlockEntityPosition),
    }
}

fn index_block_entities(
    roots: Vec<NbtRoot>,
) -> Result<BTreeMap<BlockPos, NbtRoot>, ChunkError> {
    roots
        .into_iter()
        .map(|root| Ok((block_entity_pos(&root)?, root)))
        .collect()
}

/// Present slots must form a run starting at the lowest one.
fn check_stack(sections: &[Option<SubChunk>], min_section: i8) -> Result<usize, ChunkError> {
    let count = sections.iter().take_while(|s| s.is_some()).count();
    if sections[count..].iter().any(Option::is_some) {
        return Err(ChunkError::SectionGap {
            y: min_section as i32 + count as i32,
        });
    }
    Ok(count)
}

impl ChunkColumn {
    pub fn new(x: i32, z: i32, format: ChunkFormat, registry: Arc<BlockRegistry>) -> Self {
        Self {
            x,
            z,
            sections: vec![None; format.section_span()],
            biomes: ColumnBiomes::for_layout(format.biome_layout),
            biomes_updated: true,
            biomes_hash: None,
            heightmap: [0; HEIGHTMAP_LEN],
            block_entities: BTreeMap::new(),
            entities: Vec::new(),
            format,
            registry,
        }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn z(&self) -> i32 {
        self.z
    }

    pub fn pos(&self) -> ChunkPos {
        ChunkPos::new(self.x, self.z)
    }

    pub fn format(&self) -> &ChunkFormat {
        &self.format
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    fn slot(&self, section_y: i32) -> Option<usize> {
        self.format
            .contains_section(section_y)
            .then(|| (section_y - self.format.min_section as i32) as usize)
    }

    fn section_y(&self, slot: usize) -> i8 {
        self.format.min_section + slot as i8
    }

    // ----- Sections -----

    pub fn section(&self, y: i32) -> Option<&SubChunk> {
        self.slot(y).and_then(|slot| self.sections[slot].as_ref())
    }

    /// Place a sub-chunk at its own `y`, replacing what was there.
    pub fn set_section(&mut self, sub: SubChunk) -> Result<(), ChunkError> {
        let y = sub.y() as i32;
        let slot = self.slot(y).ok_or(ChunkError::SectionOutOfRange { y })?;
        self.sections[slot] = Some(sub);
        Ok(())
    }

    /// Present sub-chunks, bottom up.
    pub fn sections(&self) -> impl Iterator<Item = &SubChunk> {
        self.sections.iter().flatten()
    }

    /// Length of the contiguous stack starting at the lowest section.
    pub fn section_count(&self) -> usize {
        self.sections.iter().take_while(|s| s.is_some()).count()
    }

    /// The contiguous stack, bottom up. Fails if a section sits above a hole.
    pub fn stack(&self) -> Result<impl Iterator<Item = &SubChunk>, ChunkError> {
        let count = check_stack(&self.sections, self.format.min_section)?;
        Ok(self.sections[..count].iter().flatten())
    }

    /// Put a decoded sub-chunk in the slot named by its `y`, once.
    fn place_decoded(
        &self,
        sections: &mut [Option<SubChunk>],
        sub: SubChunk,
    ) -> Result<(), ChunkError> {
        let y = sub.y() as i32;
        let slot = self.slot(y).ok_or(ChunkError::SectionOutOfRange { y })?;
        if sections[slot].is_some() {
            return Err(ChunkError::DuplicateSection { y });
        }
        sections[slot] = Some(sub);
        Ok(())
    }

    /// Fails when `count` sections from the bottom would leave the column.
    fn check_section_count(&self, count: usize) -> Result<(), ChunkError> {
        if count > self.format.section_span() {
            return Err(ChunkError::SectionOutOfRange {
                y: self.format.min_section as i32 + count as i32 - 1,
            });
        }
        Ok(())
    }

    // ----- Blocks -----

    /// Runtime id at local `x`/`z` and world `y`. Air where nothing is stored.
    pub fn get_block(&self, x: usize, y: i32, z: usize) -> u32 {
        self.get_block_layer(0, x, y, z)
    }

    pub fn get_block_layer(&self, layer: usize, x: usize, y: i32, z: usize) -> u32 {
        self.section(y >> 4)
            .and_then(|s| s.get_block_layer(layer, x, y as usize & 0xF, z))
            .unwrap_or(self.registry.air_id())
    }

    pub fn set_block(&mut self, x: usize, y: i32, z: usize, runtime_id: u32) -> Result<(), ChunkError> {
        self.set_block_layer(0, x, y, z, runtime_id)
    }

    /// Outside the column's vertical range this does nothing.
    ///
    /// Sections up to the target are created filled with air.
    pub fn set_block_layer(
        &mut self,
        layer: usize,
        x: usize,
        y: i32,
        z: usize,
        runtime_id: u32,
    ) -> Result<(), ChunkError> {
        let Some(slot) = self.slot(y >> 4) else {
            trace!(x, y, z, "set_block outside column range ignored");
            return Ok(());
        };
        if self.registry.state(runtime_id).is_none() {
            return Err(ChunkError::UnknownRuntimeId(runtime_id));
        }
        for i in 0..=slot {
            if self.sections[i].is_none() {
                let sub = SubChunk::new(self.section_y(i), &self.format, &self.registry)?;
                self.sections[i] = Some(sub);
            }
        }
        match &mut self.sections[slot] {
            Some(sub) => sub.set_block_layer(
                layer,
                x,
                y as usize & 0xF,
                z,
                runtime_id,
                &self.registry,
            ),
            None => Err(ChunkError::MissingSection { y: y >> 4 }),
        }
    }

    // ----- Biomes -----

    pub fn get_biome(&self, x: usize, y: i32, z: usize) -> u32 {
        self.biomes.get(&self.format, x, y, z)
    }

    pub fn set_biome(&mut self, x: usize, y: i32, z: usize, biome: u32) {
        if self.biomes.set(&self.format, x, y, z, biome) {
            self.biomes_updated = true;
        }
    }

    pub fn biomes(&self) -> &ColumnBiomes {
        &self.biomes
    }

    pub fn set_biomes(&mut self, biomes: ColumnBiomes) {
        self.biomes = biomes;
        self.biomes_updated = true;
    }

    pub fn biomes_hash(&self) -> Option<BlobHash> {
        self.biomes_hash
    }

    // ----- Heightmap -----

    pub fn heightmap(&self) -> &[i16; HEIGHTMAP_LEN] {
        &self.heightmap
    }

    pub fn set_heightmap(&mut self, heightmap: [i16; HEIGHTMAP_LEN]) {
        self.heightmap = heightmap;
    }

    /// World y of the highest non-air block per (x, z), or the column floor if none.
    pub fn compute_heightmap(&self) -> [i16; HEIGHTMAP_LEN] {
        let air = self.registry.air_id();
        let floor = self.format.min_block_y();
        let mut map = [floor as i16; HEIGHTMAP_LEN];
        for (i, height) in map.iter_mut().enumerate() {
            let (x, z) = (i / 16, i % 16);
            'column: for (slot, section) in self.sections.iter().enumerate().rev() {
                let Some(section) = section else { continue };
                for ly in (0..16).rev() {
                    if section.get_block(x, ly, z) != air {
                        *height = (floor + slot as i32 * 16 + ly as i32) as i16;
                        break 'column;
                    }
                }
            }
        }
        map
    }

    // ----- Block entities and entities -----

    /// Keyed by the compound's `x`, `y`, `z`; replaces any entity at that position.
    pub fn add_block_entity(&mut self, root: NbtRoot) -> Result<(), ChunkError> {
        let pos = block_entity_pos(&root)?;
        self.block_entities.insert(pos, root);
        Ok(())
    }

    pub fn block_entity(&self, pos: BlockPos) -> Option<&NbtRoot> {
        self.block_entities.get(&pos)
    }

    pub fn remove_block_entity(&mut self, pos: BlockPos) -> Option<NbtRoot> {
        self.block_entities.remove(&pos)
    }

    /// Re-key a block entity and rewrite its position fields.
    pub fn move_block_entity(&mut self, from: BlockPos, to: BlockPos) -> bool {
        let Some(mut root) = self.block_entities.remove(&from) else {
            return false;
        };
        root.compound.insert("x".into(), NbtTag::Int(to.x));
        root.compound.insert("y".into(), NbtTag::Int(to.y));
        root.compound.insert("z".into(), NbtTag::Int(to.z));
        self.block_entities.insert(to, root);
        true
    }

    pub fn block_entities(&self) -> impl Iterator<Item = &NbtRoot> {
        self.block_entities.values()
    }

    /// Block entities inside section `y`.
    pub fn section_block_entities(&self, y: i32) -> impl Iterator<Item = &NbtRoot> {
        self.block_entities
            .iter()
            .filter(move |(pos, _)| pos.section_y() == y)
            .map(|(_, root)| root)
    }

    pub fn add_entity(&mut self, root: NbtRoot) {
        self.entities.push(root);
    }

    pub fn entities(&self) -> &[NbtRoot] {
        &self.entities
    }

    // ----- Network encoding -----

    fn write_border_blocks(&self, buf: &mut BytesMut) {
        match self.format.border_encoding {
            BorderEncoding::Byte => buf.put_u8(0),
            BorderEncoding::VarUInt32 => VarUInt32(0).proto_encode(buf),
        }
    }

    fn read_border_blocks(&self, buf: &mut impl Buf) -> Result<(), ChunkError> {
        let count = match self.format.border_encoding {
            BorderEncoding::Byte => read_u8(buf)? as u32,
            BorderEncoding::VarUInt32 => VarUInt32::proto_decode(buf)?.0,
        };
        if count != 0 {
            return Err(ChunkError::BorderBlocks(count));
        }
        Ok(())
    }

    fn write_block_entities<'a>(buf: &mut BytesMut, roots: impl Iterator<Item = &'a NbtRoot>) {
        for root in roots {
            write_nbt_network(buf, root);
        }
    }

    fn read_block_entities(buf: &mut impl Buf) -> Result<BTreeMap<BlockPos, NbtRoot>, ChunkError> {
        let roots = read_nbt_network_stream(buf).map_err(ChunkError::nbt("block entity"))?;
        index_block_entities(roots)
    }

    /// `[runtime sub-chunks][biomes][border count][block entities]`.
    pub fn network_encode_no_cache(&self) -> Result<Bytes, ChunkError> {
        let mut buf = BytesMut::new();
        for sub in self.stack()? {
            sub.encode(StorageFormat::Runtime, &mut buf)?;
        }
        self.biomes
            .encode(&self.format, StorageFormat::Runtime, &mut buf)?;
        self.write_border_blocks(&mut buf);
        Self::write_block_entities(&mut buf, self.block_entities.values());
        Ok(buf.freeze())
    }

    /// Replace the column from a no-cache payload.
    ///
    /// With [`SectionCount::BiomesOnly`] only the biomes are read and the
    /// rest of the column is left alone.
    pub fn network_decode_no_cache(
        &mut self,
        mut bytes: Bytes,
        count: SectionCount,
    ) -> Result<(), ChunkError> {
        let count = match count {
            SectionCount::BiomesOnly => {
                let biomes = ColumnBiomes::decode(
                    &mut bytes,
                    &self.format,
                    StorageFormat::NetworkPersistent,
                    false,
                )?;
                self.set_biomes(biomes);
                return Ok(());
            }
            SectionCount::Count(count) => count,
        };
        self.check_section_count(count)?;

        let mut sections = vec![None; self.format.section_span()];
        for i in 0..count {
            let y = self.section_y(i);
            let sub = SubChunk::decode(
                &mut bytes,
                y,
                StorageFormat::Runtime,
                &self.format,
                &self.registry,
            )?;
            self.place_decoded(&mut sections, sub)?;
        }
        check_stack(&sections, self.format.min_section)?;
        let biomes = ColumnBiomes::decode(&mut bytes, &self.format, StorageFormat::Runtime, true)?;
        self.read_border_blocks(&mut bytes)?;
        let block_entities = Self::read_block_entities(&mut bytes)?;

        self.sections = sections;
        self.set_biomes(biomes);
        self.block_entities = block_entities;
        debug!(x = self.x, z = self.z, sections = count, "decoded chunk");
        Ok(())
    }

    /// Hash list (sections bottom up, biomes last) and the uncached payload.
    ///
    /// Only sub-chunks and biomes that changed, or whose blob is no longer
    /// stored, are re-encoded and written to `store`.
    pub fn network_encode_with_cache(
        &mut self,
        store: &BlobStore,
    ) -> Result<(Vec<CachedBlob>, Bytes), ChunkError> {
        let count = self.stack()?.count();
        let mut blobs = Vec::with_capacity(count + 1);

        for sub in self.sections[..count].iter_mut().flatten() {
            let hash = match sub.hash() {
                Some(hash) if !sub.is_updated() && store.has(hash) => hash,
                _ => {
                    let (hash, bytes) = sub.encode_blob()?;
                    let position = BlobPosition {
                        x: self.x,
                        y: Some(sub.y() as i32),
                        z: self.z,
                    };
                    store.write(hash, BlobEntry::new(BlobKind::ChunkSection, position, bytes));
                    hash
                }
            };
            blobs.push(CachedBlob {
                hash,
                kind: BlobKind::ChunkSection,
            });
        }

        let biomes_hash = match self.biomes_hash {
            Some(hash) if !self.biomes_updated && store.has(hash) => hash,
            _ => {
                let bytes = self
                    .biomes
                    .to_bytes(&self.format, StorageFormat::NetworkPersistent)?;
                let hash = BlobHash(blob_checksum(&bytes));
                let position = BlobPosition {
                    x: self.x,
                    y: None,
                    z: self.z,
                };
                store.write(hash, BlobEntry::new(BlobKind::Biomes, position, bytes));
                self.biomes_hash = Some(hash);
                self.biomes_updated = false;
                hash
            }
        };
        blobs.push(CachedBlob {
            hash: biomes_hash,
            kind: BlobKind::Biomes,
        });

        let mut payload = BytesMut::new();
        self.write_border_blocks(&mut payload);
        Self::write_block_entities(&mut payload, self.block_entities.values());
        Ok((blobs, payload.freeze()))
    }

    /// Rebuild the column from cached blobs.
    ///
    /// Returns the blobs missing from `store`. A non-empty result leaves the
    /// column untouched; call again with the same arguments once they arrive.
    pub fn network_decode_with_cache(
        &mut self,
        blobs: &[CachedBlob],
        store: &BlobStore,
        mut payload: Bytes,
    ) -> Result<Vec<CachedBlob>, ChunkError> {
        self.read_border_blocks(&mut payload)?;
        let block_entities = Self::read_block_entities(&mut payload)?;

        let section_blobs = blobs
            .iter()
            .filter(|b| b.kind == BlobKind::ChunkSection)
            .count();
        self.check_section_count(section_blobs)?;

        let missing = store.missing(blobs);
        if !missing.is_empty() {
            debug!(x = self.x, z = self.z, missing = missing.len(), "chunk waiting on blobs");
            return Ok(missing);
        }

        let mut sections = vec![None; self.format.section_span()];
        let mut biomes = None;
        let mut next = 0;
        for blob in blobs {
            // evicted between the membership check and here
            let Some(entry) = store.read(blob.hash) else {
                return Ok(vec![*blob]);
            };
            let mut bytes = entry.bytes.clone();
            match entry.kind {
                BlobKind::ChunkSection => {
                    self.check_section_count(next + 1)?;
                    let mut sub = SubChunk::decode(
                        &mut bytes,
                        self.section_y(next),
                        StorageFormat::NetworkPersistent,
                        &self.format,
                        &self.registry,
                    )?;
                    next += 1;
                    sub.assume_hash(blob.hash);
                    self.place_decoded(&mut sections, sub)?;
                }
                BlobKind::Biomes => {
                    let decoded = ColumnBiomes::decode(
                        &mut bytes,
                        &self.format,
                        StorageFormat::NetworkPersistent,
                        false,
                    )?;
                    biomes = Some((decoded, blob.hash));
                }
            }
        }

        check_stack(&sections, self.format.min_section)?;

        self.sections = sections;
        if let Some((decoded, hash)) = biomes {
            self.biomes = decoded;
            self.biomes_hash = Some(hash);
            self.biomes_updated = false;
        }
        self.block_entities = block_entities;
        debug!(x = self.x, z = self.z, blobs = blobs.len(), "decoded cached chunk");
        Ok(Vec::new())
    }

    /// Runtime-encoded sub-chunk followed by its block entities.
    pub fn network_encode_sub_chunk_no_cache(&self, y: i32) -> Result<Bytes, ChunkError> {
        let sub = self.section(y).ok_or(ChunkError::MissingSection { y })?;
        let mut buf = BytesMut::new();
        sub.encode(StorageFormat::Runtime, &mut buf)?;
        Self::write_block_entities(&mut buf, self.section_block_entities(y));
        Ok(buf.freeze())
    }

    /// Inverse of [`network_encode_sub_chunk_no_cache`](Self::network_encode_sub_chunk_no_cache).
    ///
    /// Block entities in the section are replaced by those in the payload.
    pub fn network_decode_sub_chunk_no_cache(
        &mut self,
        y: i32,
        mut bytes: Bytes,
    ) -> Result<(), ChunkError> {
        if !self.format.contains_section(y) {
            return Err(ChunkError::SectionOutOfRange { y });
        }
        let sub = SubChunk::decode(
            &mut bytes,
            y as i8,
            StorageFormat::Runtime,
            &self.format,
            &self.registry,
        )?;
        let block_entities = Self::read_block_entities(&mut bytes)?;

        self.set_section(sub)?;
        self.block_entities.retain(|pos, _| pos.section_y() != y);
        self.block_entities.extend(block_entities);
        Ok(())
    }
}
