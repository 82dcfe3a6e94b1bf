//! Low-level codecs shared by the on-disk format: LEB128 varints, CRC32C,
//! per-block compression, and the key hashes used by the bloom filter and
//! the sharding functions.

pub mod compress;
pub mod hash;
pub mod varint;

use crc::{Crc, CRC_32_ISCSI};

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Compute the CRC32C (Castagnoli) checksum of a byte slice.
pub fn crc32c(data: &[u8]) -> u32 {
    CASTAGNOLI.checksum(data)
}
