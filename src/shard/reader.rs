use std::collections::HashMap;
use std::fs;
use std::ops::{Bound, RangeBounds};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::BlockCache;
use crate::config::DEFAULT_CACHE_MAX_BYTES;
use crate::corruption;
use crate::errinput;
use crate::error::Result;
use crate::merge::{KvIterator, MergeIterator};
use crate::shard::{parse_shard_file_name, shard_path, sharder_from_meta, ShardingFunction};
use crate::sstable::meta::TableMetadata;
use crate::sstable::reader::{Reader, ReaderOptions};

/// Reads a sharded table as one logical table.
///
/// On open, the shard count is recovered from the `-SSSSS-of-NNNNN.sst`
/// file names beside `base`, every shard is opened against one shared block
/// cache, and each shard's recorded sharder identity is checked against the
/// others: the files of a sharded table either agree or were never one
/// table.
pub struct ShardedReader {
    base: PathBuf,
    shards: Vec<Reader>,
    sharder: Box<dyn ShardingFunction>,
    num_shards: u32,
}

impl std::fmt::Debug for ShardedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedReader")
            .field("base", &self.base)
            .field("num_shards", &self.num_shards)
            .finish()
    }
}

impl ShardedReader {
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        Self::open_with(base, ReaderOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(base: P, options: ReaderOptions) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let num_shards = discover_num_shards(&base)?;

        let cache = options
            .cache
            .unwrap_or_else(|| Arc::new(BlockCache::new(DEFAULT_CACHE_MAX_BYTES)));

        let mut shards = Vec::with_capacity(num_shards as usize);
        for shard in 0..num_shards {
            let shard_options = ReaderOptions {
                cache: Some(Arc::clone(&cache)),
                mmap_filter: options.mmap_filter,
            };
            shards.push(Reader::open_with(
                shard_path(&base, shard, num_shards),
                shard_options,
            )?);
        }

        // Every shard must carry the same (sharder, config, count) triple.
        let first = shards[0].table_meta().shard.clone();
        if first.num_shards != num_shards {
            return Err(corruption!(
                "shard manifest skew: meta says {} shards, directory holds {num_shards}",
                first.num_shards
            ));
        }
        for (i, shard) in shards.iter().enumerate().skip(1) {
            if shard.table_meta().shard != first {
                return Err(corruption!(
                    "shard manifest skew: shard {i} disagrees with shard 0"
                ));
            }
        }

        let sharder = sharder_from_meta(&first.sharder_name, &first.sharder_config)?;
        sharder.validate(num_shards)?;

        tracing::debug!(
            base = %base.display(),
            num_shards,
            sharder = first.sharder_name,
            "opened sharded sstable"
        );

        Ok(Self {
            base,
            shards,
            sharder,
            num_shards,
        })
    }

    /// Point lookup, delegated to the one shard that can hold the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let shard = self.sharder.shard_of(key, self.num_shards) as usize;
        self.shards[shard].get(key)
    }

    /// `false` means no shard can contain the key.
    #[must_use]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        let shard = self.sharder.shard_of(key, self.num_shards) as usize;
        self.shards[shard].might_contain(key)
    }

    /// Merged scan across shards in global key order. For the range
    /// sharder, only shards whose key range intersects the query are read.
    pub fn scan<R>(&self, range: R) -> Result<MergeIterator<'_>>
    where
        R: RangeBounds<Vec<u8>> + Clone + Send + 'static,
    {
        let start = bound_slice(range.start_bound());
        let end = bound_slice(range.end_bound());
        let covering = self.sharder.covering_shards(start, end, self.num_shards);

        let mut sources: Vec<KvIterator<'_>> = Vec::with_capacity(covering.len());
        for shard in covering {
            let iter = self.shards[shard as usize].scan(range.clone())?;
            sources.push(Box::new(iter));
        }
        Ok(MergeIterator::new(sources))
    }

    /// Aggregated facts across all shards.
    pub fn metadata(&self) -> TableMetadata {
        let mut entries = 0;
        let mut unique_keys = 0;
        for shard in &self.shards {
            let meta = shard.table_meta();
            entries += meta.entries;
            unique_keys += meta.unique_keys;
        }
        TableMetadata {
            entries,
            unique_keys,
            num_shards: self.num_shards,
            sharder_name: self.sharder.name().to_string(),
            path: self.base.clone(),
        }
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }
}

fn bound_slice(bound: Bound<&Vec<u8>>) -> Option<&[u8]> {
    match bound {
        Bound::Included(key) | Bound::Excluded(key) => Some(key.as_slice()),
        Bound::Unbounded => None,
    }
}

/// Recover the shard count from the files beside `base` and require the
/// full set to be present.
fn discover_num_shards(base: &Path) -> Result<u32> {
    let dir = match base.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let base_name = base
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| errinput!("bad sharded table base path: {base:?}"))?;

    let mut found: HashMap<u32, u32> = HashMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some((name, shard, total)) = parse_shard_file_name(file_name) {
            if name == base_name {
                found.insert(shard, total);
            }
        }
    }
    if found.is_empty() {
        return Err(errinput!("no shard files found for {base:?}"));
    }

    let totals: Vec<u32> = {
        let mut totals: Vec<u32> = found.values().copied().collect();
        totals.sort_unstable();
        totals.dedup();
        totals
    };
    if totals.len() != 1 {
        return Err(corruption!(
            "shard manifest skew: mixed shard counts {totals:?} for {base:?}"
        ));
    }
    let num_shards = totals[0];
    if num_shards == 0 {
        return Err(corruption!("shard file declares zero shards for {base:?}"));
    }
    for shard in 0..num_shards {
        if !found.contains_key(&shard) {
            return Err(corruption!(
                "missing shard {shard} of {num_shards} for {base:?}"
            ));
        }
    }
    Ok(num_shards)
}
