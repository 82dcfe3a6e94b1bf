use std::path::{Path, PathBuf};

use crate::config::TableConfig;
use crate::errinput;
use crate::error::Result;
use crate::shard::{shard_path, ShardingFunction};
use crate::sstable::meta::{ShardManifest, TableMetadata};
use crate::sstable::writer::Writer;

/// Writes one logical table as N shard files. Entries arrive in global key
/// order and are routed to their shard's writer; each shard therefore
/// receives a sorted stream and every shard records the same sharder
/// identity in its meta block.
pub struct ShardedWriter {
    base: PathBuf,
    writers: Vec<Writer>,
    sharder: Box<dyn ShardingFunction>,
    num_shards: u32,
    last_key: Vec<u8>,
}

impl ShardedWriter {
    pub fn create<P: AsRef<Path>>(
        base: P,
        num_shards: u32,
        sharder: Box<dyn ShardingFunction>,
        config: TableConfig,
    ) -> Result<Self> {
        sharder.validate(num_shards)?;

        let base = base.as_ref().to_path_buf();
        let manifest = ShardManifest {
            sharder_name: sharder.name().to_string(),
            sharder_config: sharder.config(),
            num_shards,
        };
        let mut writers = Vec::with_capacity(num_shards as usize);
        for shard in 0..num_shards {
            let path = shard_path(&base, shard, num_shards);
            let mut writer = Writer::create(path, config.clone())?;
            writer.set_shard_manifest(manifest.clone());
            writers.push(writer);
        }
        Ok(Self {
            base,
            writers,
            sharder,
            num_shards,
            last_key: Vec::new(),
        })
    }

    /// Append one entry in global sorted order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if !self.last_key.is_empty() && !key.is_empty() && key < self.last_key.as_slice() {
            return Err(errinput!(
                "out of order: key {:?} after {:?}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(&self.last_key)
            ));
        }
        let shard = self.sharder.shard_of(key, self.num_shards) as usize;
        self.writers[shard].add(key, value)?;
        if self.last_key.as_slice() != key {
            self.last_key.clear();
            self.last_key.extend_from_slice(key);
        }
        Ok(())
    }

    /// Finalize every shard. Each shard publishes atomically on its own;
    /// a failure part-way leaves already-published shards in place and the
    /// rest as nothing (their `.tmp` files are cleaned up on drop).
    pub fn finish_and_close(self) -> Result<TableMetadata> {
        let mut entries = 0;
        let mut unique_keys = 0;
        let sharder_name = self.sharder.name().to_string();
        for writer in self.writers {
            let shard_metadata = writer.finish_and_close()?;
            entries += shard_metadata.entries;
            unique_keys += shard_metadata.unique_keys;
        }
        tracing::info!(
            base = %self.base.display(),
            num_shards = self.num_shards,
            entries,
            "published sharded sstable"
        );
        Ok(TableMetadata {
            entries,
            unique_keys,
            num_shards: self.num_shards,
            sharder_name,
            path: self.base,
        })
    }
}
