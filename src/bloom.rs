//! Bloom filter with a memory-mappable on-disk form.
//!
//! Each table embeds the filter as its filter block and also persists the
//! identical bytes as a `<table>.bf` sidecar, so a reader can either parse
//! the block or map the sidecar without copying.
//!
//! Wire format (big-endian):
//! ```text
//! [magic: u64][k: u8][m: u32][bits: ceil(m / 8) bytes]
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};

use crate::codec::hash::murmur3_32;
use crate::corruption;
use crate::error::Result;

/// Magic prefix of the sidecar format.
pub const BLOOM_MAGIC: u64 = 0x0000_BF1D_BEAD_0B11;

/// Header: magic (8) + k (1) + m (4).
const HEADER_LEN: usize = 13;

/// Refuse to allocate filters larger than this when reading. Prevents OOM
/// on corrupt headers.
const MAX_BLOOM_BYTES: usize = 128 * 1024 * 1024;

/// Seeds for the two murmur3 hashes backing double hashing.
const SEED_H1: u32 = 0;
const SEED_H2: u32 = 4;

/// A bloom filter with `m` bits and `k` double-hashed probes per key.
///
/// Never reports a false negative; false positives are bounded by the
/// chosen parameters.
pub struct BloomFilter {
    num_bits: u32,
    num_hashes: u32,
    bits: Bits,
}

enum Bits {
    Owned(Vec<u8>),
    Mapped { map: memmap2::Mmap, _file: File },
}

impl Bits {
    fn as_slice(&self) -> &[u8] {
        match self {
            Bits::Owned(bits) => bits,
            // The sidecar header was validated when the map was created.
            Bits::Mapped { map, .. } => &map[HEADER_LEN..],
        }
    }
}

impl BloomFilter {
    /// Create an empty filter with `num_bits` bits and `num_hashes` probes.
    pub fn new(num_bits: u32, num_hashes: u32) -> Self {
        let num_bits = num_bits.max(8);
        let num_hashes = num_hashes.clamp(1, 255);
        let byte_len = (num_bits as usize + 7) / 8;
        Self {
            num_bits,
            num_hashes,
            bits: Bits::Owned(vec![0u8; byte_len]),
        }
    }

    /// Add a key to the filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = hash_pair(key);
        let bits = match &mut self.bits {
            Bits::Owned(bits) => bits,
            // Readers never insert; mapped filters are constructed read-only.
            Bits::Mapped { .. } => unreachable!("mapped bloom filter is read-only"),
        };
        for i in 0..self.num_hashes {
            let idx = probe(h1, h2, i, self.num_bits);
            bits[(idx >> 3) as usize] |= 1 << (idx & 7);
        }
    }

    /// Return `false` if the key is definitely absent, `true` if it might be
    /// present.
    #[must_use]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = hash_pair(key);
        let bits = self.bits.as_slice();
        for i in 0..self.num_hashes {
            let idx = probe(h1, h2, i, self.num_bits);
            if bits[(idx >> 3) as usize] & (1 << (idx & 7)) == 0 {
                return false;
            }
        }
        true
    }

    /// Number of bits (`m`).
    #[must_use]
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Number of probes (`k`).
    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Serialize to the sidecar wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let bits = self.bits.as_slice();
        let mut out = Vec::with_capacity(HEADER_LEN + bits.len());
        out.extend_from_slice(&BLOOM_MAGIC.to_be_bytes());
        out.push(self.num_hashes as u8);
        out.extend_from_slice(&self.num_bits.to_be_bytes());
        out.extend_from_slice(bits);
        out
    }

    /// Parse a filter from sidecar-format bytes, copying the bit array.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (num_bits, num_hashes, byte_len) = parse_header(data)?;
        if data.len() < HEADER_LEN + byte_len {
            return Err(corruption!(
                "bloom filter truncated: {} bytes, need {}",
                data.len(),
                HEADER_LEN + byte_len
            ));
        }
        Ok(Self {
            num_bits,
            num_hashes,
            bits: Bits::Owned(data[HEADER_LEN..HEADER_LEN + byte_len].to_vec()),
        })
    }

    /// Persist the filter to `path` in sidecar format and fsync it.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(&self.to_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Memory-map a sidecar previously written by [`write_to`](Self::write_to).
    ///
    /// The file must stay unmodified while mapped; published sidecars are
    /// immutable, so this holds by contract.
    pub fn map_from(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: read-only mapping of an immutable published file; the file
        // handle is kept alive for the lifetime of the map.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        let (num_bits, num_hashes, byte_len) = parse_header(&map)?;
        if map.len() < HEADER_LEN + byte_len {
            return Err(corruption!(
                "bloom sidecar truncated: {} bytes, need {}",
                map.len(),
                HEADER_LEN + byte_len
            ));
        }
        Ok(Self {
            num_bits,
            num_hashes,
            bits: Bits::Mapped { map, _file: file },
        })
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field(
                "mapped",
                &matches!(self.bits, Bits::Mapped { .. }),
            )
            .finish()
    }
}

fn parse_header(data: &[u8]) -> Result<(u32, u32, usize)> {
    if data.len() < HEADER_LEN {
        return Err(corruption!("bloom filter header truncated"));
    }
    let magic = BigEndian::read_u64(&data[0..8]);
    if magic != BLOOM_MAGIC {
        return Err(corruption!("bad bloom magic: {magic:#018x}"));
    }
    let num_hashes = u32::from(data[8]);
    let num_bits = BigEndian::read_u32(&data[9..13]);
    if num_hashes == 0 || num_bits == 0 {
        return Err(corruption!(
            "bad bloom parameters: k={num_hashes} m={num_bits}"
        ));
    }
    let byte_len = (num_bits as usize + 7) / 8;
    if byte_len > MAX_BLOOM_BYTES {
        return Err(corruption!("bloom filter too large: {byte_len} bytes"));
    }
    Ok((num_bits, num_hashes, byte_len))
}

fn hash_pair(key: &[u8]) -> (u32, u32) {
    (murmur3_32(key, SEED_H1), murmur3_32(key, SEED_H2))
}

fn probe(h1: u32, h2: u32, i: u32, num_bits: u32) -> u32 {
    h1.wrapping_add(i.wrapping_mul(h2)) % num_bits
}
