//! Content hash for cached chunk blobs.
//!
//! The client computes blob ids with XXH64 (seed 0) over the
//! network-persistent sub-chunk bytes, so the result must match bit for bit.

use xxhash_rust::xxh64::xxh64;

/// Blob checksum: XXH64 with seed 0.
pub fn blob_checksum(data: &[u8]) -> u64 {
    xxh64(data, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(blob_checksum(b""), 0xEF46_DB37_51D8_E999);
        assert_eq!(blob_checksum(b"a"), 0xD24E_C4F1_A98C_6E5B);
        assert_eq!(blob_checksum(b"abc"), 0x44BC_2CF5_AD77_0999);
        assert_eq!(
            blob_checksum(b"Nobody inspects the spammish repetition"),
            0xFBCE_A83C_8A37_8BF1
        );
    }

    #[test]
    fn single_byte_changes_hash() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let full = blob_checksum(&data);
        let mut tail = data;
        tail[999] ^= 1;
        assert_ne!(full, blob_checksum(&tail));
    }
}
