//! 16x16x16 sub-chunk storage and its three wire framings.
//!
//! Record layout (versions 8 and 9):
//!
//! ```text
//! [version u8][layer count u8][y i8, version 9 only]
//! per layer: [(bits << 1) | runtime][words u32_le * n][palette count][palette entries]
//! ```
//!
//! `bits == 0` means every voxel is palette index 0 and no words follow.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mcbe_nbt::{read_nbt_le, read_nbt_network, write_nbt_le, write_nbt_network};
use mcbe_proto::codec::{read_i32_le, read_i8, read_u8};
use mcbe_proto::{ProtoDecode, ProtoEncode, VarInt};
use tracing::warn;

use crate::bit_array::voxel_index;
use crate::blob_store::BlobHash;
use crate::error::ChunkError;
use crate::hash::blob_checksum;
use crate::palette::{read_words, Indices, Palette, PaletteEntry};
use crate::registry::BlockRegistry;
use crate::version::ChunkFormat;

const NBT_COMPOUND: u8 = 0x0A;

/// Which of the three palette framings a record uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    /// LevelDB records: `i32_le` count, little-endian NBT entries.
    Disk,
    /// Cacheable network blobs: VarInt count, network NBT entries.
    NetworkPersistent,
    /// Session-local network data: VarInt count, VarInt runtime ids.
    Runtime,
}

impl StorageFormat {
    pub fn is_runtime(self) -> bool {
        self == StorageFormat::Runtime
    }

    /// Counts and biome values: `i32_le` on disk, ZigZag VarInt on the network.
    pub(crate) fn write_int(self, buf: &mut impl BufMut, value: i32) {
        match self {
            StorageFormat::Disk => buf.put_i32_le(value),
            _ => VarInt(value).proto_encode(buf),
        }
    }

    pub(crate) fn read_int(self, buf: &mut impl Buf) -> Result<i32, ChunkError> {
        Ok(match self {
            StorageFormat::Disk => read_i32_le(buf)?,
            _ => VarInt::proto_decode(buf)?.0,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Layer {
    palette: Palette,
    indices: Indices,
}

impl Layer {
    fn filled(entry: PaletteEntry) -> Self {
        Self {
            palette: Palette::with_entry(entry),
            indices: Indices::Uniform,
        }
    }

    fn global_id(&self, index: usize) -> u32 {
        self.palette
            .get(self.indices.get(index))
            .map_or(0, |e| e.global_id)
    }

    fn encode(&self, format: StorageFormat, buf: &mut BytesMut) -> Result<(), ChunkError> {
        let bits = self.palette.bits_per_block();
        buf.put_u8((bits << 1) | format.is_runtime() as u8);

        self.indices.write_words(bits, buf)?;

        format.write_int(buf, self.palette.len() as i32);
        for entry in self.palette.entries() {
            match format {
                StorageFormat::Runtime => VarInt(entry.global_id as i32).proto_encode(buf),
                StorageFormat::NetworkPersistent => write_nbt_network(buf, &entry.to_nbt()),
                StorageFormat::Disk => write_nbt_le(buf, &entry.to_nbt()),
            }
        }
        Ok(())
    }

    fn decode(
        buf: &mut impl Buf,
        y: i32,
        layer: usize,
        format: StorageFormat,
        chunk_format: &ChunkFormat,
        registry: &BlockRegistry,
    ) -> Result<Self, ChunkError> {
        let header = read_u8(buf)?;
        let runtime = header & 1 == 1;
        if runtime != format.is_runtime() {
            return Err(ChunkError::FramingMismatch {
                y,
                layer,
                expected: format,
            });
        }

        let words = read_words(buf, header >> 1)?;

        let declared = format.read_int(buf)?;
        if declared < 1 || declared as usize > buf.remaining() {
            return Err(ChunkError::InvalidPaletteSize {
                y,
                layer,
                size: declared as i64,
            });
        }
        let declared = declared as usize;

        let serialized = match format {
            StorageFormat::Runtime => (0..declared)
                .map(|_| {
                    let id = VarInt::proto_decode(buf)?.0 as u32;
                    registry.entry(id)
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => read_persistent_palette(buf, declared, format)?
                .iter()
                .map(|root| registry.entry_from_nbt(&root.compound))
                .collect::<Result<Vec<_>, _>>()?,
        };

        if serialized.len() != declared {
            if chunk_format.strict_palette_size {
                return Err(ChunkError::PaletteSizeMismatch {
                    y,
                    layer,
                    expected: declared,
                    actual: serialized.len(),
                });
            }
            warn!(
                y,
                layer,
                declared,
                actual = serialized.len(),
                "palette shorter than declared, using parsed entries"
            );
        }

        // Serialized order may differ from ours once duplicates collapse,
        // so map each serialized index through its global id.
        let mut palette = Palette::new();
        let remap: Vec<u16> = serialized.into_iter().map(|e| palette.insert(e)).collect();

        let indices = Indices::remapped(words.as_ref(), &remap, y, layer)?;

        Ok(Self { palette, indices })
    }
}

/// NBT entries are read while the next byte opens a compound, up to `declared`.
fn read_persistent_palette(
    buf: &mut impl Buf,
    declared: usize,
    format: StorageFormat,
) -> Result<Vec<mcbe_nbt::NbtRoot>, ChunkError> {
    let mut roots = Vec::with_capacity(declared);
    while roots.len() < declared && buf.has_remaining() && buf.chunk()[0] == NBT_COMPOUND {
        let root = match format {
            StorageFormat::Disk => read_nbt_le(buf),
            _ => read_nbt_network(buf),
        }
        .map_err(ChunkError::nbt("palette entry"))?;
        roots.push(root);
    }
    Ok(roots)
}

/// One vertical slice of a chunk column.
#[derive(Debug, Clone, PartialEq)]
pub struct SubChunk {
    y: i8,
    version: u8,
    layers: Vec<Layer>,
    air: PaletteEntry,
    updated: bool,
    hash: Option<BlobHash>,
}

impl SubChunk {
    /// All-air sub-chunk written with the format's sub-chunk version.
    pub fn new(y: i8, format: &ChunkFormat, registry: &BlockRegistry) -> Result<Self, ChunkError> {
        let air = registry.entry(registry.air_id())?;
        Ok(Self {
            y,
            version: format.sub_chunk_version,
            layers: vec![Layer::filled(air.clone())],
            air,
            updated: true,
            hash: None,
        })
    }

    pub fn y(&self) -> i8 {
        self.y
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn palette(&self, layer: usize) -> Option<&Palette> {
        self.layers.get(layer).map(|l| &l.palette)
    }

    /// Width the layer would be written with.
    pub fn bits_per_block(&self, layer: usize) -> Option<u8> {
        self.palette(layer).map(Palette::bits_per_block)
    }

    /// Set by every mutation, cleared when the persistent blob is rebuilt.
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Hash of the last persistent blob. Stale while [`is_updated`](Self::is_updated).
    pub fn hash(&self) -> Option<BlobHash> {
        self.hash
    }

    pub fn get_block(&self, x: usize, y: usize, z: usize) -> u32 {
        self.get_block_layer(0, x, y, z).unwrap_or(self.air.global_id)
    }

    /// `None` if the layer does not exist.
    pub fn get_block_layer(&self, layer: usize, x: usize, y: usize, z: usize) -> Option<u32> {
        self.layers
            .get(layer)
            .map(|l| l.global_id(voxel_index(x, y, z)))
    }

    pub fn set_block(
        &mut self,
        x: usize,
        y: usize,
        z: usize,
        runtime_id: u32,
        registry: &BlockRegistry,
    ) -> Result<(), ChunkError> {
        self.set_block_layer(0, x, y, z, runtime_id, registry)
    }

    /// Missing layers up to `layer` are created filled with air.
    pub fn set_block_layer(
        &mut self,
        layer: usize,
        x: usize,
        y: usize,
        z: usize,
        runtime_id: u32,
        registry: &BlockRegistry,
    ) -> Result<(), ChunkError> {
        let local = match self.layers.get(layer).and_then(|l| l.palette.index_of(runtime_id)) {
            Some(local) => local,
            None => {
                let entry = registry.entry(runtime_id)?;
                self.ensure_layer(layer).palette.insert(entry)
            }
        };
        self.ensure_layer(layer)
            .indices
            .set(voxel_index(x, y, z), local);
        self.updated = true;
        Ok(())
    }

    fn ensure_layer(&mut self, layer: usize) -> &mut Layer {
        while self.layers.len() <= layer {
            self.layers.push(Layer::filled(self.air.clone()));
        }
        &mut self.layers[layer]
    }

    /// True when every layer resolves to air everywhere.
    pub fn is_empty(&self) -> bool {
        self.layers
            .iter()
            .all(|l| l.palette.global_ids().all(|id| id == self.air.global_id))
    }

    pub fn encode(&self, format: StorageFormat, buf: &mut BytesMut) -> Result<(), ChunkError> {
        buf.put_u8(self.version);
        buf.put_u8(self.layers.len() as u8);
        if self.version >= 9 {
            buf.put_i8(self.y);
        }
        for layer in &self.layers {
            layer.encode(format, buf)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self, format: StorageFormat) -> Result<Bytes, ChunkError> {
        let mut buf = BytesMut::new();
        self.encode(format, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Encode as a network-persistent blob, refresh the hash and clear the dirty flag.
    pub fn encode_blob(&mut self) -> Result<(BlobHash, Bytes), ChunkError> {
        let bytes = self.to_bytes(StorageFormat::NetworkPersistent)?;
        let hash = BlobHash(blob_checksum(&bytes));
        self.hash = Some(hash);
        self.updated = false;
        Ok((hash, bytes))
    }

    /// Mark a freshly decoded persistent blob as matching `hash`.
    pub(crate) fn assume_hash(&mut self, hash: BlobHash) {
        self.hash = Some(hash);
        self.updated = false;
    }

    /// Decode one record. `y` is used unless the record carries its own index.
    pub fn decode(
        buf: &mut impl Buf,
        y: i8,
        format: StorageFormat,
        chunk_format: &ChunkFormat,
        registry: &BlockRegistry,
    ) -> Result<Self, ChunkError> {
        let version = read_u8(buf)?;
        if version > 9 {
            return Err(ChunkError::UnsupportedSubChunkVersion {
                y: y as i32,
                version,
            });
        }
        let layer_count = if version >= 8 { read_u8(buf)? } else { 1 };
        let y = if version >= 9 { read_i8(buf)? } else { y };

        let layers = (0..layer_count as usize)
            .map(|layer| Layer::decode(buf, y as i32, layer, format, chunk_format, registry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            y,
            version: version.max(8),
            layers,
            air: registry.entry(registry.air_id())?,
            updated: true,
            hash: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bit_array::{BitArray, VOLUME};
    use crate::registry::{BlockState, StateValue};
    use crate::version::ChunkVersion;

    fn registry() -> BlockRegistry {
        let mut states = vec![BlockState::new("minecraft:air")];
        for i in 0..400 {
            states.push(BlockState::new("test:block").with("n", StateValue::Int(i)));
        }
        BlockRegistry::from_states(states)
    }

    fn modern() -> ChunkFormat {
        ChunkFormat::for_version(ChunkVersion::V1_18_0)
    }

    fn roundtrip(sub: &SubChunk, format: StorageFormat, registry: &BlockRegistry) -> SubChunk {
        let bytes = sub.to_bytes(format).unwrap();
        let mut cursor = bytes.clone();
        let back = SubChunk::decode(&mut cursor, 0, format, &modern(), registry).unwrap();
        assert_eq!(cursor.remaining(), 0, "{format:?} left bytes behind");
        back
    }

    #[test]
    fn fresh_sub_chunk_is_air() {
        let registry = registry();
        let sub = SubChunk::new(3, &modern(), &registry).unwrap();
        assert_eq!(sub.get_block(0, 0, 0), 0);
        assert_eq!(sub.palette(0).unwrap().len(), 1);
        assert_eq!(sub.bits_per_block(0), Some(0));
        assert!(sub.is_empty());
        assert!(sub.is_updated());
    }

    #[test]
    fn uniform_volume_decodes_to_one_entry_zero_bits() {
        let registry = registry();
        let mut sub = SubChunk::new(0, &modern(), &registry).unwrap();
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    sub.set_block(x, y, z, 7, &registry).unwrap();
                }
            }
        }
        // air is still in the append-only palette
        assert_eq!(sub.palette(0).unwrap().len(), 2);

        // a record holding only block 7
        let mut only = SubChunk::new(0, &modern(), &registry).unwrap();
        only.layers[0] = Layer::filled(registry.entry(7).unwrap());
        let bytes = only.to_bytes(StorageFormat::Runtime).unwrap();
        // version, layers, y, header (0 bits | runtime), count 1, id 7
        assert_eq!(&bytes[..], &[9, 1, 0, 0x01, 0x02, 0x0E]);

        let back = SubChunk::decode(&mut bytes.clone(), 0, StorageFormat::Runtime, &modern(), &registry)
            .unwrap();
        assert_eq!(back.palette(0).unwrap().len(), 1);
        assert_eq!(back.bits_per_block(0), Some(0));
        assert_eq!(back.get_block(9, 9, 9), 7);
    }

    #[test]
    fn three_hundred_ids_use_sixteen_bits() {
        let registry = registry();
        let mut sub = SubChunk::new(0, &modern(), &registry).unwrap();
        for i in 0..300usize {
            sub.set_block(i >> 8, i & 0xF, (i >> 4) & 0xF, i as u32 + 1, &registry)
                .unwrap();
        }
        assert_eq!(sub.bits_per_block(0), Some(16));
        let back = roundtrip(&sub, StorageFormat::Runtime, &registry);
        assert_eq!(back.bits_per_block(0), Some(16));
        for i in 0..300usize {
            assert_eq!(back.get_block(i >> 8, i & 0xF, (i >> 4) & 0xF), i as u32 + 1);
        }
    }

    #[test]
    fn set_block_palette_idempotence() {
        let registry = registry();
        let mut sub = SubChunk::new(0, &modern(), &registry).unwrap();
        sub.set_block(1, 2, 3, 5, &registry).unwrap();
        sub.set_block(1, 2, 3, 5, &registry).unwrap();
        assert_eq!(sub.palette(0).unwrap().len(), 2);
        for id in [5, 6, 7, 8] {
            sub.set_block(4, 4, id as usize, id, &registry).unwrap();
        }
        assert_eq!(sub.palette(0).unwrap().len(), 5);
    }

    #[test]
    fn bit_width_grows_monotonically() {
        let registry = registry();
        let mut sub = SubChunk::new(0, &modern(), &registry).unwrap();
        let mut last = 0;
        for id in 1..=300u32 {
            let i = id as usize;
            sub.set_block(i >> 8, i & 0xF, (i >> 4) & 0xF, id, &registry).unwrap();
            let bits = sub.bits_per_block(0).unwrap();
            assert!(bits >= last);
            assert!(matches!(bits, 0..=8 | 16));
            last = bits;
        }
    }

    #[test]
    fn all_framings_roundtrip() {
        let registry = registry();
        let mut sub = SubChunk::new(-2, &modern(), &registry).unwrap();
        sub.set_block(0, 0, 0, 10, &registry).unwrap();
        sub.set_block(15, 15, 15, 11, &registry).unwrap();
        sub.set_block(7, 3, 12, 12, &registry).unwrap();
        sub.set_block_layer(1, 7, 3, 12, 13, &registry).unwrap();

        for format in [
            StorageFormat::Disk,
            StorageFormat::NetworkPersistent,
            StorageFormat::Runtime,
        ] {
            let back = roundtrip(&sub, format, &registry);
            assert_eq!(back.y(), -2);
            assert_eq!(back.layer_count(), 2);
            assert_eq!(back.get_block(0, 0, 0), 10);
            assert_eq!(back.get_block(15, 15, 15), 11);
            assert_eq!(back.get_block(7, 3, 12), 12);
            assert_eq!(back.get_block(1, 1, 1), 0);
            assert_eq!(back.get_block_layer(1, 7, 3, 12), Some(13));
            assert_eq!(back.get_block_layer(1, 0, 0, 0), Some(0));
        }
    }

    #[test]
    fn version_8_has_no_y_byte() {
        let registry = registry();
        let format = ChunkFormat::for_version(ChunkVersion::V1_16_210);
        let sub = SubChunk::new(5, &format, &registry).unwrap();
        let bytes = sub.to_bytes(StorageFormat::Disk).unwrap();
        assert_eq!(&bytes[..3], &[8, 1, 0x00]);
        let back = SubChunk::decode(&mut bytes.clone(), 5, StorageFormat::Disk, &format, &registry)
            .unwrap();
        assert_eq!(back.y(), 5);
    }

    #[test]
    fn version_1_has_implicit_layer() {
        let registry = registry();
        // version 1, header 0 bits runtime, count 1, id 3
        let data = [1u8, 0x01, 0x02, 0x06];
        let sub = SubChunk::decode(&mut &data[..], 4, StorageFormat::Runtime, &modern(), &registry)
            .unwrap();
        assert_eq!(sub.layer_count(), 1);
        assert_eq!(sub.get_block(0, 0, 0), 3);
    }

    #[test]
    fn newer_versions_rejected() {
        let registry = registry();
        let data = [10u8, 1, 0];
        assert!(matches!(
            SubChunk::decode(&mut &data[..], 0, StorageFormat::Runtime, &modern(), &registry),
            Err(ChunkError::UnsupportedSubChunkVersion { version: 10, .. })
        ));
    }

    #[test]
    fn framing_bit_must_match() {
        let registry = registry();
        let sub = SubChunk::new(0, &modern(), &registry).unwrap();
        let bytes = sub.to_bytes(StorageFormat::Runtime).unwrap();
        assert!(matches!(
            SubChunk::decode(&mut bytes.clone(), 0, StorageFormat::NetworkPersistent, &modern(), &registry),
            Err(ChunkError::FramingMismatch { layer: 0, expected: StorageFormat::NetworkPersistent, .. })
        ));
        let bytes = sub.to_bytes(StorageFormat::Disk).unwrap();
        assert!(matches!(
            SubChunk::decode(&mut bytes.clone(), 0, StorageFormat::Runtime, &modern(), &registry),
            Err(ChunkError::FramingMismatch { .. })
        ));
    }

    #[test]
    fn palette_size_bounds() {
        let registry = registry();
        // zero entries
        let zero = [9u8, 1, 2, 0x01, 0x00];
        assert!(matches!(
            SubChunk::decode(&mut &zero[..], 0, StorageFormat::Runtime, &modern(), &registry),
            Err(ChunkError::InvalidPaletteSize { y: 2, layer: 0, size: 0 })
        ));
        // more entries than bytes left
        let big = [9u8, 1, 2, 0x01, 0x7E, 0x02];
        assert!(matches!(
            SubChunk::decode(&mut &big[..], 0, StorageFormat::Runtime, &modern(), &registry),
            Err(ChunkError::InvalidPaletteSize { size: 63, .. })
        ));
    }

    #[test]
    fn index_past_palette_is_fatal() {
        let registry = registry();
        let mut data = BytesMut::new();
        data.put_slice(&[9, 1, 0, (1 << 1) | 1]);
        let mut words = BitArray::new(1, VOLUME).unwrap();
        words.set(100, 1);
        words.write_to(&mut data);
        data.put_slice(&[0x02, 0x00]); // one entry: air
        assert!(matches!(
            SubChunk::decode(&mut data.freeze(), 0, StorageFormat::Runtime, &modern(), &registry),
            Err(ChunkError::PaletteOutOfBounds { index: 1, len: 1, .. })
        ));
    }

    #[test]
    fn short_persistent_palette_strict_and_lenient() {
        let registry = registry();
        let mut data = BytesMut::new();
        data.put_slice(&[9, 1, 0, 0x00]);
        data.put_i32_le(2);
        write_nbt_le(&mut data, &registry.entry(4).unwrap().to_nbt());
        // padding so the declared count fits in the remaining bytes
        data.put_slice(&[0, 0]);
        let bytes = data.freeze();

        let strict = modern();
        assert!(matches!(
            SubChunk::decode(&mut bytes.clone(), 0, StorageFormat::Disk, &strict, &registry),
            Err(ChunkError::PaletteSizeMismatch { expected: 2, actual: 1, .. })
        ));

        let lenient = modern().with_strict_palette_size(false);
        let sub = SubChunk::decode(&mut bytes.clone(), 0, StorageFormat::Disk, &lenient, &registry)
            .unwrap();
        assert_eq!(sub.get_block(3, 3, 3), 4);
    }

    #[test]
    fn duplicate_serialized_entries_are_remapped() {
        let registry = registry();
        let mut data = BytesMut::new();
        data.put_slice(&[9, 1, 0, (2 << 1) | 1]);
        let mut words = BitArray::new(2, VOLUME).unwrap();
        words.set(0, 0);
        words.set(1, 1);
        words.set(2, 2);
        words.write_to(&mut data);
        // palette [5, 5, 6]: index 1 duplicates index 0
        VarInt(3).proto_encode(&mut data);
        for id in [5, 5, 6] {
            VarInt(id).proto_encode(&mut data);
        }
        let sub = SubChunk::decode(&mut data.freeze(), 0, StorageFormat::Runtime, &modern(), &registry)
            .unwrap();
        assert_eq!(sub.palette(0).unwrap().len(), 2);
        assert_eq!(sub.get_block_layer(0, 0, 0, 0), Some(5));
        assert_eq!(sub.get_block_layer(0, 0, 1, 0), Some(5));
        assert_eq!(sub.get_block_layer(0, 0, 2, 0), Some(6));
    }

    #[test]
    fn unknown_runtime_id_in_palette() {
        let registry = registry();
        let data = [9u8, 1, 0, 0x01, 0x02, 0xD0, 0x0F];
        assert!(matches!(
            SubChunk::decode(&mut &data[..], 0, StorageFormat::Runtime, &modern(), &registry),
            Err(ChunkError::UnknownRuntimeId(1000))
        ));
    }

    #[test]
    fn blob_hash_tracks_dirty_flag() {
        let registry = registry();
        let mut sub = SubChunk::new(0, &modern(), &registry).unwrap();
        assert_eq!(sub.hash(), None);
        let (first, bytes) = sub.encode_blob().unwrap();
        assert!(!sub.is_updated());
        assert_eq!(first, BlobHash(blob_checksum(&bytes)));

        sub.set_block(0, 0, 0, 9, &registry).unwrap();
        assert!(sub.is_updated());
        let (second, _) = sub.encode_blob().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn unknown_id_leaves_sub_chunk_untouched() {
        let registry = registry();
        let mut sub = SubChunk::new(0, &modern(), &registry).unwrap();
        let _ = sub.encode_blob().unwrap();
        assert!(sub.set_block(0, 0, 0, 5000, &registry).is_err());
        assert!(!sub.is_updated());
        assert_eq!(sub.palette(0).unwrap().len(), 1);
    }
}
