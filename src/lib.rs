//! Immutable, sorted, on-disk key/value tables (SSTables) with sharding.
//!
//! A table is written once, published atomically, and never mutated:
//! prefix-compressed data blocks with restart points, per-block zstd and a
//! CRC32C trailer, a sparse index, a bloom filter (embedded and as an
//! mmap-able `.bf` sidecar), and a fixed footer. Reads go through a
//! segmented LRU block cache. A sharded table splits one keyspace across N
//! shard files routed by a stable sharding function.
//!
//! ```no_run
//! use basalt::{Reader, TableConfig, Writer};
//!
//! # fn main() -> basalt::Result<()> {
//! let mut writer = Writer::create("users.sst", TableConfig::default())?;
//! writer.add(b"alice", b"app(1)")?;
//! writer.add(b"bob", b"app(2)")?;
//! writer.finish_and_close()?;
//!
//! let reader = Reader::open("users.sst")?;
//! assert_eq!(reader.get(b"alice")?, Some(b"app(1)".to_vec()));
//! # Ok(())
//! # }
//! ```

pub mod bloom;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod merge;
pub mod shard;
pub mod sstable;

pub use bloom::BloomFilter;
pub use cache::{BlockCache, CacheKey};
pub use codec::compress::Compression;
pub use config::{CacheConfig, TableConfig};
pub use error::{Error, Result};
pub use shard::{
    FingerprintSharder, ModSharder, RangeSharder, ShardedReader, ShardedWriter,
    ShardingFunction,
};
pub use sstable::meta::TableMetadata;
pub use sstable::reader::{Reader, ReaderOptions};
pub use sstable::writer::Writer;
