use crate::codec::compress::Compression;

/// Default target payload size for a data block, pre-compression.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;
/// Default number of entries between restart points.
pub const DEFAULT_RESTART_INTERVAL: usize = 16;
/// Default bloom filter width in bits (2^20).
pub const DEFAULT_BLOOM_BITS: u32 = 1 << 20;
/// Default number of bloom probes per key.
pub const DEFAULT_BLOOM_HASHES: u32 = 4;
/// Default block cache budget (64 MiB).
pub const DEFAULT_CACHE_MAX_BYTES: usize = 64 * 1024 * 1024;

/// Configuration for writing a table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Target data block payload size before compression (default: 4 KiB).
    pub block_size: usize,

    /// Entries between prefix-compression restart points (default: 16).
    pub restart_interval: usize,

    /// Per-block compression codec (default: zstd level 3).
    pub compression: Compression,

    /// Bloom filter bit count (default: 2^20).
    pub bloom_bits: u32,

    /// Bloom filter hash count (default: 4).
    pub bloom_hashes: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            restart_interval: DEFAULT_RESTART_INTERVAL,
            compression: Compression::default(),
            bloom_bits: DEFAULT_BLOOM_BITS,
            bloom_hashes: DEFAULT_BLOOM_HASHES,
        }
    }
}

impl TableConfig {
    /// Set the target data block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the restart interval.
    pub fn restart_interval(mut self, interval: usize) -> Self {
        self.restart_interval = interval;
        self
    }

    /// Set the per-block compression codec.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the bloom filter bit count.
    pub fn bloom_bits(mut self, bits: u32) -> Self {
        self.bloom_bits = bits;
        self
    }

    /// Set the bloom filter hash count.
    pub fn bloom_hashes(mut self, hashes: u32) -> Self {
        self.bloom_hashes = hashes;
        self
    }
}

/// Configuration for the block cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Global byte budget across all segments (default: 64 MiB).
    pub max_bytes: usize,

    /// Segment count; rounded up to a power of two. `None` picks
    /// `clamp(next_pow2(2 * cores), 8, 64)`.
    pub segments: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_CACHE_MAX_BYTES,
            segments: None,
        }
    }
}

impl CacheConfig {
    /// Set the global byte budget.
    pub fn max_bytes(mut self, bytes: usize) -> Self {
        self.max_bytes = bytes;
        self
    }

    /// Set an explicit segment count.
    pub fn segments(mut self, segments: usize) -> Self {
        self.segments = Some(segments);
        self
    }
}
