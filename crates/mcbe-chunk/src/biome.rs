//! Biome storage: paletted 3-D sections (1.18+) and the legacy 2-D byte map.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mcbe_proto::codec::{read_bytes, read_u8};

use crate::bit_array::voxel_index;
use crate::error::ChunkError;
use crate::palette::{bits_per_block, read_words, Indices};
use crate::sub_chunk::StorageFormat;
use crate::version::{BiomeLayout, ChunkFormat};

/// Header byte meaning "same as the section below".
const COPY_PREVIOUS: u8 = 0xFF;

/// Size of the legacy 2-D biome map.
pub const LEGACY_BIOME_LEN: usize = 256;

/// One 16x16x16 section of biome ids.
#[derive(Debug, Clone, PartialEq)]
pub struct BiomeSection {
    palette: Vec<u32>,
    indices: Indices,
}

impl Default for BiomeSection {
    fn default() -> Self {
        Self::uniform(0)
    }
}

impl BiomeSection {
    pub fn uniform(biome: u32) -> Self {
        Self {
            palette: vec![biome],
            indices: Indices::Uniform,
        }
    }

    pub fn palette(&self) -> &[u32] {
        &self.palette
    }

    pub fn bits_per_block(&self) -> u8 {
        bits_per_block(self.palette.len())
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> u32 {
        let local = self.indices.get(voxel_index(x, y, z));
        self.palette.get(local as usize).copied().unwrap_or(0)
    }

    pub fn set(&mut self, x: usize, y: usize, z: usize, biome: u32) {
        let local = match self.palette.iter().position(|&b| b == biome) {
            Some(i) => i as u16,
            None => {
                self.palette.push(biome);
                (self.palette.len() - 1) as u16
            }
        };
        self.indices.set(voxel_index(x, y, z), local);
    }

    /// Write one section. Disk uses `i32_le` values with a clear flag bit,
    /// network formats use VarInt values with the flag set.
    pub fn encode(&self, format: StorageFormat, buf: &mut impl BufMut) -> Result<(), ChunkError> {
        let bits = self.bits_per_block();
        let network = format != StorageFormat::Disk;
        buf.put_u8((bits << 1) | network as u8);
        if bits == 0 {
            format.write_int(buf, self.palette.first().copied().unwrap_or(0) as i32);
            return Ok(());
        }
        self.indices.write_words(bits, buf)?;
        format.write_int(buf, self.palette.len() as i32);
        for &biome in &self.palette {
            format.write_int(buf, biome as i32);
        }
        Ok(())
    }

    /// Read one section. The low header bit is not checked against `format`.
    ///
    /// `previous` is consulted for the copy marker; a marker with nothing
    /// below it is an error.
    pub fn decode(
        buf: &mut impl Buf,
        format: StorageFormat,
        y: i32,
        previous: Option<&BiomeSection>,
    ) -> Result<Self, ChunkError> {
        let header = read_u8(buf)?;
        if header == COPY_PREVIOUS {
            return previous.cloned().ok_or(ChunkError::NoPreviousBiomes { y });
        }

        let words = read_words(buf, header >> 1)?;
        if words.is_none() {
            let biome = format.read_int(buf)? as u32;
            return Ok(Self::uniform(biome));
        }

        let declared = format.read_int(buf)?;
        if declared < 1 || declared as usize > buf.remaining() {
            return Err(ChunkError::InvalidPaletteSize {
                y,
                layer: 0,
                size: declared as i64,
            });
        }

        let mut palette: Vec<u32> = Vec::with_capacity(declared as usize);
        let mut remap = Vec::with_capacity(declared as usize);
        for _ in 0..declared {
            let biome = format.read_int(buf)? as u32;
            let local = match palette.iter().position(|&b| b == biome) {
                Some(i) => i,
                None => {
                    palette.push(biome);
                    palette.len() - 1
                }
            };
            remap.push(local as u16);
        }

        let indices = Indices::remapped(words.as_ref(), &remap, y, 0)?;
        Ok(Self { palette, indices })
    }
}

/// Biome storage for a whole column, shaped by [`BiomeLayout`].
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnBiomes {
    /// One byte per (x, z), index `x * 16 + z`.
    Flat(Box<[u8; LEGACY_BIOME_LEN]>),
    /// One section per vertical slot from the bottom; missing tops read as biome 0.
    Sections(Vec<BiomeSection>),
}

impl ColumnBiomes {
    pub fn for_layout(layout: BiomeLayout) -> Self {
        match layout {
            BiomeLayout::Legacy2D => ColumnBiomes::Flat(Box::new([0; LEGACY_BIOME_LEN])),
            BiomeLayout::Paletted3D => ColumnBiomes::Sections(Vec::new()),
        }
    }

    /// `y` is a world block coordinate. Legacy maps ignore it.
    pub fn get(&self, format: &ChunkFormat, x: usize, y: i32, z: usize) -> u32 {
        match self {
            ColumnBiomes::Flat(map) => map[(x & 0xF) * 16 + (z & 0xF)] as u32,
            ColumnBiomes::Sections(sections) => {
                let slot = (y >> 4) - format.min_section as i32;
                usize::try_from(slot)
                    .ok()
                    .and_then(|slot| sections.get(slot))
                    .map_or(0, |s| s.get(x, y as usize & 0xF, z))
            }
        }
    }

    /// Returns false when `y` is outside the column.
    pub fn set(&mut self, format: &ChunkFormat, x: usize, y: i32, z: usize, biome: u32) -> bool {
        match self {
            ColumnBiomes::Flat(map) => {
                map[(x & 0xF) * 16 + (z & 0xF)] = biome as u8;
                true
            }
            ColumnBiomes::Sections(sections) => {
                if !format.contains_section(y >> 4) {
                    return false;
                }
                let slot = ((y >> 4) - format.min_section as i32) as usize;
                if sections.len() <= slot {
                    sections.resize_with(slot + 1, BiomeSection::default);
                }
                sections[slot].set(x, y as usize & 0xF, z, biome);
                true
            }
        }
    }

    /// Network and disk payload. 3-D layouts always write every slot in the column.
    pub fn encode(
        &self,
        format: &ChunkFormat,
        storage: StorageFormat,
        buf: &mut BytesMut,
    ) -> Result<(), ChunkError> {
        match self {
            ColumnBiomes::Flat(map) => buf.put_slice(&map[..]),
            ColumnBiomes::Sections(sections) => {
                let filler = BiomeSection::default();
                let mut previous: Option<&BiomeSection> = None;
                for slot in 0..format.section_span() {
                    let section = sections.get(slot).unwrap_or(&filler);
                    if storage == StorageFormat::Disk && previous == Some(section) {
                        buf.put_u8(COPY_PREVIOUS);
                    } else {
                        section.encode(storage, buf)?;
                    }
                    previous = Some(section);
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self, format: &ChunkFormat, storage: StorageFormat) -> Result<Bytes, ChunkError> {
        let mut buf = BytesMut::new();
        self.encode(format, storage, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Read a column's biomes.
    ///
    /// With `exact`, a 3-D layout reads every slot of the column, as the
    /// biomes are followed by more data. Otherwise reading stops early when
    /// the buffer runs out.
    pub fn decode(
        buf: &mut impl Buf,
        format: &ChunkFormat,
        storage: StorageFormat,
        exact: bool,
    ) -> Result<Self, ChunkError> {
        match format.biome_layout {
            BiomeLayout::Legacy2D => {
                let bytes = read_bytes(buf, LEGACY_BIOME_LEN)?;
                let mut map = Box::new([0u8; LEGACY_BIOME_LEN]);
                map.copy_from_slice(&bytes);
                Ok(ColumnBiomes::Flat(map))
            }
            BiomeLayout::Paletted3D => {
                let mut sections: Vec<BiomeSection> = Vec::with_capacity(format.section_span());
                for slot in 0..format.section_span() {
                    if !exact && !buf.has_remaining() {
                        break;
                    }
                    let y = format.min_section as i32 + slot as i32;
                    let section = BiomeSection::decode(buf, storage, y, sections.last())?;
                    sections.push(section);
                }
                Ok(ColumnBiomes::Sections(sections))
            }
        }
    }
}
