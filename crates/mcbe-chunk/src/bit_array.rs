//! Word-aligned bit-packed index storage.
//!
//! Entries are packed LSB-first into little-endian `u32` words and never
//! straddle a word boundary: each word holds `32 / bits` entries and the
//! remaining `32 % bits` high bits are padding.

use bytes::{Buf, BufMut};
use mcbe_proto::codec::ensure_remaining;

use crate::error::ChunkError;

const WORD_BITS: u32 = 32;

/// Entries in one 16x16x16 volume.
pub const VOLUME: usize = 4096;

/// Linear index of a voxel. `y` varies fastest, then `z`, then `x`.
#[inline]
pub fn voxel_index(x: usize, y: usize, z: usize) -> usize {
    ((x & 0xF) << 8) | ((z & 0xF) << 4) | (y & 0xF)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitArray {
    bits: u8,
    capacity: usize,
    entries_per_word: usize,
    mask: u32,
    words: Vec<u32>,
}

impl BitArray {
    /// Zero-filled array of `capacity` entries at `bits` bits each.
    pub fn new(bits: u8, capacity: usize) -> Result<Self, ChunkError> {
        if bits == 0 || bits as u32 > WORD_BITS {
            return Err(ChunkError::InvalidBitsPerEntry(bits));
        }
        let entries_per_word = (WORD_BITS / bits as u32) as usize;
        let mask = if bits as u32 == WORD_BITS {
            u32::MAX
        } else {
            (1u32 << bits) - 1
        };
        Ok(Self {
            bits,
            capacity,
            entries_per_word,
            mask,
            words: vec![0; capacity.div_ceil(entries_per_word)],
        })
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Size on the wire.
    pub fn byte_len(&self) -> usize {
        self.words.len() * 4
    }

    #[inline]
    fn locate(&self, index: usize) -> (usize, u32) {
        let word = index / self.entries_per_word;
        let shift = (index % self.entries_per_word) as u32 * self.bits as u32;
        (word, shift)
    }

    /// Panics if `index >= capacity`.
    pub fn get(&self, index: usize) -> u32 {
        let (word, shift) = self.locate(index);
        (self.words[word] >> shift) & self.mask
    }

    /// Values wider than `bits` are truncated.
    pub fn set(&mut self, index: usize, value: u32) {
        let (word, shift) = self.locate(index);
        let w = &mut self.words[word];
        *w = (*w & !(self.mask << shift)) | ((value & self.mask) << shift);
    }

    pub fn get_at(&self, x: usize, y: usize, z: usize) -> u32 {
        self.get(voxel_index(x, y, z))
    }

    pub fn set_at(&mut self, x: usize, y: usize, z: usize, value: u32) {
        self.set(voxel_index(x, y, z), value)
    }

    /// Replace the words with exactly `word_count()` words read from `buf`.
    pub fn read_from(&mut self, buf: &mut impl Buf) -> Result<(), ChunkError> {
        ensure_remaining(buf, self.byte_len())?;
        for word in &mut self.words {
            *word = buf.get_u32_le();
        }
        Ok(())
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        for &word in &self.words {
            buf.put_u32_le(word);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn rejects_zero_and_oversized_width() {
        assert!(matches!(
            BitArray::new(0, VOLUME),
            Err(ChunkError::InvalidBitsPerEntry(0))
        ));
        assert!(BitArray::new(33, VOLUME).is_err());
        assert!(BitArray::new(32, VOLUME).is_ok());
    }

    #[test]
    fn word_counts_include_padding() {
        // 32/3 = 10 entries per word, 2 padding bits
        assert_eq!(BitArray::new(3, VOLUME).unwrap().word_count(), 410);
        assert_eq!(BitArray::new(5, VOLUME).unwrap().word_count(), 683);
        assert_eq!(BitArray::new(6, VOLUME).unwrap().word_count(), 820);
        assert_eq!(BitArray::new(7, VOLUME).unwrap().word_count(), 1024);
        assert_eq!(BitArray::new(16, VOLUME).unwrap().word_count(), 2048);
        assert_eq!(BitArray::new(1, 64).unwrap().word_count(), 2);
    }

    #[test]
    fn entries_never_straddle_words() {
        let mut arr = BitArray::new(3, VOLUME).unwrap();
        // index 10 is the first entry of word 1
        arr.set(9, 0b111);
        arr.set(10, 0b101);
        let mut buf = BytesMut::new();
        arr.write_to(&mut buf);
        let word0 = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let word1 = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        assert_eq!(word0, 0b111 << 27);
        assert_eq!(word1, 0b101);
    }

    #[test]
    fn set_masks_value() {
        let mut arr = BitArray::new(2, VOLUME).unwrap();
        arr.set(0, 0b1110);
        assert_eq!(arr.get(0), 0b10);
        assert_eq!(arr.get(1), 0);
    }

    #[test]
    fn overwrite_clears_old_bits() {
        let mut arr = BitArray::new(4, VOLUME).unwrap();
        arr.set(5, 0xF);
        arr.set(5, 0x3);
        assert_eq!(arr.get(5), 0x3);
        assert_eq!(arr.get(4), 0);
        assert_eq!(arr.get(6), 0);
    }

    #[test]
    fn voxel_layout_is_xzy() {
        assert_eq!(voxel_index(1, 2, 3), 0x132);
        assert_eq!(voxel_index(15, 15, 15), 4095);
        // coordinates are masked to the local range
        assert_eq!(voxel_index(17, 18, 19), voxel_index(1, 2, 3));

        let mut arr = BitArray::new(8, VOLUME).unwrap();
        arr.set_at(1, 2, 3, 200);
        assert_eq!(arr.get(0x132), 200);
        assert_eq!(arr.get_at(1, 2, 3), 200);
    }

    #[test]
    fn wire_roundtrip_every_width() {
        for bits in 1..=16u8 {
            let mut arr = BitArray::new(bits, VOLUME).unwrap();
            let mask = (1u32 << bits) - 1;
            for i in 0..VOLUME {
                arr.set(i, (i as u32 * 7) & mask);
            }
            let mut buf = BytesMut::new();
            arr.write_to(&mut buf);
            assert_eq!(buf.len(), arr.byte_len());

            let mut back = BitArray::new(bits, VOLUME).unwrap();
            back.read_from(&mut buf.freeze()).unwrap();
            assert_eq!(back, arr, "width {bits}");
        }
    }

    #[test]
    fn read_short_buffer() {
        let mut arr = BitArray::new(4, VOLUME).unwrap();
        let data = vec![0u8; arr.byte_len() - 1];
        assert!(matches!(
            arr.read_from(&mut &data[..]),
            Err(ChunkError::Proto(_))
        ));
    }
}
