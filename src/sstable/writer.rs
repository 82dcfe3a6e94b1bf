//! Streaming table writer.
//!
//! File layout:
//! ```text
//! +----------------------------+
//! | header pad (64 zero bytes) |
//! +----------------------------+
//! | data block 1               |
//! +----------------------------+
//! | ...                        |
//! +----------------------------+
//! | data block N               |
//! +----------------------------+
//! | filter block               |
//! +----------------------------+
//! | index block                |
//! +----------------------------+
//! | meta block                 |
//! +----------------------------+
//! | footer (48 bytes)          |
//! +----------------------------+
//! ```
//! The writer streams sorted entries into a `.tmp` sibling of the target
//! path. `finish_and_close` seals the file, fsyncs it, renames it into
//! place (the commit point), fsyncs the directory, and persists the bloom
//! sidecar. Dropping an unfinished writer deletes the `.tmp` file, so the
//! final path either appears complete or not at all.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::mem;
use std::path::{Path, PathBuf};

use crate::bloom::BloomFilter;
use crate::codec::compress::Compression;
use crate::config::TableConfig;
use crate::errinput;
use crate::error::Result;
use crate::sstable::block::BlockBuilder;
use crate::sstable::format::{
    encode_block, BlockHandle, BlockKind, Footer, HEADER_PAD_LEN,
};
use crate::sstable::index::Index;
use crate::sstable::meta::{ShardManifest, TableMeta, TableMetadata};
use crate::sstable::sidecar_path;

pub struct Writer {
    file: File,
    final_path: PathBuf,
    tmp_path: PathBuf,
    config: TableConfig,
    builder: BlockBuilder,
    index: Index,
    bloom: BloomFilter,
    shard: ShardManifest,
    offset: u64,
    last_key: Vec<u8>,
    entries: u64,
    unique_keys: u64,
    finished: bool,
}

impl Writer {
    /// Create a writer targeting `path`. The table is built in a `.tmp`
    /// sibling and only appears at `path` once `finish_and_close` returns.
    pub fn create<P: AsRef<Path>>(path: P, config: TableConfig) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        if let Some(dir) = final_path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut tmp_name = final_path
            .file_name()
            .ok_or_else(|| errinput!("table path has no file name: {final_path:?}"))?
            .to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = final_path.with_file_name(tmp_name);

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&[0u8; HEADER_PAD_LEN as usize])?;

        Ok(Self {
            file,
            final_path,
            tmp_path,
            builder: BlockBuilder::new(config.restart_interval),
            index: Index::new(),
            bloom: BloomFilter::new(config.bloom_bits, config.bloom_hashes),
            shard: ShardManifest::default(),
            config,
            offset: HEADER_PAD_LEN,
            last_key: Vec::new(),
            entries: 0,
            unique_keys: 0,
            finished: false,
        })
    }

    /// Record the sharder identity for this shard's meta block. Set by the
    /// sharded writer before any entries arrive.
    pub(crate) fn set_shard_manifest(&mut self, shard: ShardManifest) {
        self.shard = shard;
    }

    /// Append one entry. Keys must arrive in non-decreasing order; equal
    /// keys are allowed (multiple versions) and are not deduplicated.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(errinput!("empty key"));
        }
        if value.is_empty() {
            return Err(errinput!("empty value"));
        }
        if !self.last_key.is_empty() && key < self.last_key.as_slice() {
            return Err(errinput!(
                "out of order: key {:?} after {:?}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(&self.last_key)
            ));
        }

        self.builder.add(key, value);
        self.bloom.insert(key);
        self.entries += 1;
        if self.last_key.as_slice() != key {
            self.unique_keys += 1;
            self.last_key.clear();
            self.last_key.extend_from_slice(key);
        }

        if self.builder.estimated_size() >= self.config.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Number of entries appended so far.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Seal the current data block and record its index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.builder.is_empty() {
            return Ok(());
        }
        let builder = mem::replace(
            &mut self.builder,
            BlockBuilder::new(self.config.restart_interval),
        );
        let first_key = builder.first_key().to_vec();
        let payload = builder.finish();
        let record = encode_block(BlockKind::Data, &payload, self.config.compression)?;
        self.file.write_all(&record)?;
        self.index.push(first_key, self.offset, record.len() as u32);
        self.offset += record.len() as u64;
        Ok(())
    }

    fn write_trailing_block(&mut self, kind: BlockKind, payload: &[u8]) -> Result<BlockHandle> {
        let record = encode_block(kind, payload, Compression::None)?;
        self.file.write_all(&record)?;
        let handle = BlockHandle {
            offset: self.offset,
            length: record.len() as u32,
        };
        self.offset += record.len() as u64;
        Ok(handle)
    }

    /// Flush the residual block, emit the filter/index/meta blocks and the
    /// footer, then durably publish: fsync, atomic rename, directory fsync,
    /// bloom sidecar.
    pub fn finish_and_close(mut self) -> Result<TableMetadata> {
        self.flush_block()?;

        let filter_payload = self.bloom.to_bytes();
        let filter = self.write_trailing_block(BlockKind::Filter, &filter_payload)?;

        let index_payload = self.index.encode();
        let index = self.write_trailing_block(BlockKind::Index, &index_payload)?;

        let meta = TableMeta {
            creator: concat!("basalt/", env!("CARGO_PKG_VERSION")).to_string(),
            entries: self.entries,
            unique_keys: self.unique_keys,
            compression: self.config.compression.name().to_string(),
            shard: self.shard.clone(),
        };
        let meta_handle = self.write_trailing_block(BlockKind::Meta, &meta.encode())?;

        let footer = Footer {
            index,
            filter,
            meta: meta_handle,
        };
        self.file.write_all(&footer.encode())?;
        self.file.sync_all()?;

        // Commit point: the table appears at the final path atomically.
        fs::rename(&self.tmp_path, &self.final_path)?;
        sync_parent_dir(&self.final_path)?;

        self.bloom.write_to(&sidecar_path(&self.final_path))?;
        self.finished = true;

        tracing::info!(
            path = %self.final_path.display(),
            entries = self.entries,
            unique_keys = self.unique_keys,
            blocks = self.index.len(),
            "published sstable"
        );

        Ok(TableMetadata {
            entries: self.entries,
            unique_keys: self.unique_keys,
            num_shards: self.shard.num_shards,
            sharder_name: self.shard.sharder_name.clone(),
            path: self.final_path.clone(),
        })
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            File::open(dir)?.sync_all()?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}
