//! Pure, stateless codec interfaces the core treats as opaque (spec.md 6).
//!
//! Grounded on `src/pager/wal.rs::checksum_for`'s crc32fast usage and the
//! interface-only treatment the teacher gives pluggable backends in
//! `primitives/io::FileIo`.

/// `checksum(type, nonce, bytes) -> digest` (spec.md 6), specialised here to
/// a 32-bit digest since that is all the engine's on-disk formats need.
pub trait Checksum: Send + Sync {
    fn checksum(&self, bytes: &[u8]) -> u32;
}

/// CRC32 checksum backend (the only one the block layer in this crate uses).
pub struct Crc32Checksum;

impl Checksum for Crc32Checksum {
    fn checksum(&self, bytes: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(bytes);
        hasher.finalize()
    }
}

/// `compress(type, in, out_max) -> len_or_fail` (spec.md 6).
pub trait Compressor: Send + Sync {
    fn compress(&self, input: &[u8]) -> Vec<u8>;
    fn decompress(&self, input: &[u8], expected_len: usize) -> Option<Vec<u8>>;
}

/// No-op compressor; a stand-in for lz4/zstd, which are external collaborators.
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compress(&self, input: &[u8]) -> Vec<u8> {
        input.to_vec()
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Option<Vec<u8>> {
        if input.len() == expected_len {
            Some(input.to_vec())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_is_deterministic() {
        let c = Crc32Checksum;
        assert_eq!(c.checksum(b"hello"), c.checksum(b"hello"));
        assert_ne!(c.checksum(b"hello"), c.checksum(b"world"));
    }

    #[test]
    fn none_compressor_round_trips() {
        let c = NoneCompressor;
        let data = b"payload".to_vec();
        let compressed = c.compress(&data);
        assert_eq!(c.decompress(&compressed, data.len()).unwrap(), data);
    }
}
