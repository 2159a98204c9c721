//! Per-layer block palettes.

use std::collections::HashMap;

use bytes::{Buf, BufMut};
use mcbe_nbt::{NbtRoot, NbtTag};

use crate::bit_array::{BitArray, VOLUME};
use crate::error::ChunkError;
use crate::registry::{properties_to_nbt, StateProperties};

/// One distinct block state referenced by a storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaletteEntry {
    pub global_id: u32,
    pub name: String,
    pub properties: StateProperties,
    pub version: i32,
}

impl PaletteEntry {
    /// `{name, states, version}` compound, in the field order the game writes.
    pub fn to_nbt(&self) -> NbtRoot {
        NbtRoot::default()
            .with("name", NbtTag::String(self.name.clone()))
            .with("states", NbtTag::Compound(properties_to_nbt(&self.properties)))
            .with("version", NbtTag::Int(self.version))
    }
}

/// Bits per index needed for a palette of `size` entries.
///
/// `ceil(log2(size))`, except that anything wider than 8 is stored at 16:
/// the format has no 9..15-bit encodings. A single entry needs 0 bits.
pub fn bits_per_block(size: usize) -> u8 {
    if size <= 1 {
        return 0;
    }
    let bits = (usize::BITS - (size - 1).leading_zeros()) as u8;
    if bits > 8 {
        16
    } else {
        bits
    }
}

/// Append-only, deduplicated list of palette entries.
///
/// Local indices are assigned in insertion order and never change, so the
/// layer's index array stays valid as the palette grows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Palette {
    entries: Vec<PaletteEntry>,
    lookup: HashMap<u32, u16>,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(entry: PaletteEntry) -> Self {
        let mut palette = Self::new();
        palette.insert(entry);
        palette
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: u16) -> Option<&PaletteEntry> {
        self.entries.get(index as usize)
    }

    pub fn index_of(&self, global_id: u32) -> Option<u16> {
        self.lookup.get(&global_id).copied()
    }

    pub fn contains(&self, global_id: u32) -> bool {
        self.lookup.contains_key(&global_id)
    }

    /// Index of the entry, appending it if its `global_id` is new.
    pub fn insert(&mut self, entry: PaletteEntry) -> u16 {
        if let Some(index) = self.index_of(entry.global_id) {
            return index;
        }
        let index = self.entries.len() as u16;
        self.lookup.insert(entry.global_id, index);
        self.entries.push(entry);
        index
    }

    pub fn entries(&self) -> &[PaletteEntry] {
        &self.entries
    }

    pub fn global_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|e| e.global_id)
    }

    pub fn bits_per_block(&self) -> u8 {
        bits_per_block(self.entries.len())
    }
}

/// Local palette index of every voxel in a 16x16x16 volume.
///
/// `Uniform` is the zero-width case where every voxel is index 0 and no
/// words are stored.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Indices {
    Uniform,
    Dense(Box<[u16; VOLUME]>),
}

impl Indices {
    pub(crate) fn get(&self, index: usize) -> u16 {
        match self {
            Indices::Uniform => 0,
            Indices::Dense(data) => data[index],
        }
    }

    pub(crate) fn set(&mut self, index: usize, value: u16) {
        if let Indices::Uniform = self {
            if value == 0 {
                return;
            }
            *self = Indices::Dense(Box::new([0; VOLUME]));
        }
        if let Indices::Dense(data) = self {
            data[index] = value;
        }
    }

    /// Pack at `bits` per entry. Nothing is written for zero bits.
    pub(crate) fn write_words(&self, bits: u8, buf: &mut impl BufMut) -> Result<(), ChunkError> {
        if bits == 0 {
            return Ok(());
        }
        let mut words = BitArray::new(bits, VOLUME)?;
        if let Indices::Dense(data) = self {
            for (i, &local) in data.iter().enumerate() {
                words.set(i, local as u32);
            }
        }
        words.write_to(buf);
        Ok(())
    }

    /// Translate serialized indices through `remap`.
    ///
    /// `remap[i]` is the local index of the i-th serialized palette entry.
    /// Indices past the end of `remap` fail with `PaletteOutOfBounds`.
    pub(crate) fn remapped(
        words: Option<&BitArray>,
        remap: &[u16],
        y: i32,
        layer: usize,
    ) -> Result<Self, ChunkError> {
        let Some(words) = words else {
            return Ok(Indices::Uniform);
        };
        let mut data = Box::new([0u16; VOLUME]);
        for (i, slot) in data.iter_mut().enumerate() {
            let serialized = words.get(i);
            *slot = *remap
                .get(serialized as usize)
                .ok_or(ChunkError::PaletteOutOfBounds {
                    y,
                    layer,
                    index: serialized,
                    len: remap.len(),
                })?;
        }
        Ok(Indices::Dense(data))
    }
}

/// Read the packed words that follow a `(bits << 1) | flag` header.
pub(crate) fn read_words(buf: &mut impl Buf, bits: u8) -> Result<Option<BitArray>, ChunkError> {
    if bits == 0 {
        return Ok(None);
    }
    let mut words = BitArray::new(bits, VOLUME)?;
    words.read_from(buf)?;
    Ok(Some(words))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u32) -> PaletteEntry {
        PaletteEntry {
            global_id: id,
            name: format!("test:block_{id}"),
            properties: StateProperties::new(),
            version: 1,
        }
    }

    #[test]
    fn width_table() {
        let expected = [
            (1, 0),
            (2, 1),
            (3, 2),
            (4, 2),
            (5, 3),
            (16, 4),
            (17, 5),
            (64, 6),
            (65, 7),
            (128, 7),
            (129, 8),
            (256, 8),
            (257, 16),
            (300, 16),
            (4096, 16),
        ];
        for (size, bits) in expected {
            assert_eq!(bits_per_block(size), bits, "size {size}");
        }
    }

    #[test]
    fn width_is_monotonic_and_never_9_to_15() {
        let mut last = 0;
        for size in 1..=5000 {
            let bits = bits_per_block(size);
            assert!(bits >= last);
            assert!(!(9..=15).contains(&bits));
            last = bits;
        }
    }

    #[test]
    fn insert_is_idempotent() {
        let mut palette = Palette::with_entry(entry(0));
        assert_eq!(palette.insert(entry(5)), 1);
        assert_eq!(palette.insert(entry(5)), 1);
        assert_eq!(palette.insert(entry(0)), 0);
        assert_eq!(palette.len(), 2);
        assert_eq!(palette.index_of(5), Some(1));
        assert!(!palette.contains(7));
    }

    #[test]
    fn order_is_insertion_not_id() {
        let mut palette = Palette::new();
        for id in [40, 3, 17] {
            palette.insert(entry(id));
        }
        assert_eq!(palette.global_ids().collect::<Vec<_>>(), [40, 3, 17]);
        assert_eq!(palette.get(1).map(|e| e.global_id), Some(3));
    }

    #[test]
    fn uniform_indices_promote_on_first_nonzero_write() {
        let mut indices = Indices::Uniform;
        indices.set(10, 0);
        assert_eq!(indices, Indices::Uniform);
        indices.set(10, 3);
        assert_eq!(indices.get(10), 3);
        assert_eq!(indices.get(11), 0);
    }

    #[test]
    fn remap_rejects_out_of_range_index() {
        let mut words = BitArray::new(2, VOLUME).unwrap();
        words.set(0, 1);
        words.set(1, 2);
        let indices = Indices::remapped(Some(&words), &[0, 1, 1], 0, 0).unwrap();
        assert_eq!(indices.get(1), 1);

        words.set(2, 3);
        assert!(matches!(
            Indices::remapped(Some(&words), &[0, 1, 1], 4, 1),
            Err(ChunkError::PaletteOutOfBounds { y: 4, layer: 1, index: 3, len: 3 })
        ));
    }

    #[test]
    fn nbt_field_order() {
        let nbt = entry(1).to_nbt();
        let keys: Vec<_> = nbt.compound.keys().map(String::as_str).collect();
        assert_eq!(keys, ["name", "states", "version"]);
        assert_eq!(nbt.get_string("name"), Some("test:block_1"));
    }
}
