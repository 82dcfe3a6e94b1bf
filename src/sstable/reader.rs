//! Table reader: footer validation, in-memory index and filter, and cached
//! block fetches.
//!
//! Everything loaded by `open` is immutable afterwards, so any number of
//! threads may share one reader. The only locks on the read path are the
//! cache segment lock and, for cold blocks, the reader's file handle; the
//! two are never held together.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::{Bound, RangeBounds};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::bloom::BloomFilter;
use crate::cache::{BlockCache, CacheKey};
use crate::corruption;
use crate::error::Result;
use crate::filter::RangeFilter;
use crate::sstable::block::{Block, BlockIterator};
use crate::sstable::format::{decode_block, BlockHandle, BlockKind, Footer, FOOTER_LEN};
use crate::sstable::index::{Index, IndexEntry};
use crate::sstable::meta::{TableMeta, TableMetadata};
use crate::sstable::sidecar_path;

/// Options for opening a table.
#[derive(Clone, Default)]
pub struct ReaderOptions {
    /// Share a block cache across readers. A private cache is created when
    /// absent.
    pub cache: Option<Arc<BlockCache>>,
    /// Map the `.bf` sidecar instead of copying the filter block into
    /// memory.
    pub mmap_filter: bool,
}

pub struct Reader {
    path: Arc<PathBuf>,
    file: Mutex<File>,
    file_len: u64,
    index: Index,
    filter: BloomFilter,
    meta: TableMeta,
    cache: Arc<BlockCache>,
}

impl Reader {
    /// Open a published table with a private block cache.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    /// Open a published table.
    pub fn open_with<P: AsRef<Path>>(path: P, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len < FOOTER_LEN {
            return Err(corruption!(
                "file too small for footer: {file_len} bytes in {path:?}"
            ));
        }

        file.seek(SeekFrom::End(-(FOOTER_LEN as i64)))?;
        let mut footer_bytes = [0u8; FOOTER_LEN as usize];
        file.read_exact(&mut footer_bytes)?;
        let footer = Footer::decode(&footer_bytes)?;

        let index_payload =
            read_record(&mut file, file_len, footer.index, BlockKind::Index)?;
        let index = Index::decode(&index_payload)?;

        let sidecar = sidecar_path(&path);
        let filter = if options.mmap_filter && sidecar.exists() {
            BloomFilter::map_from(&sidecar)?
        } else {
            let filter_payload =
                read_record(&mut file, file_len, footer.filter, BlockKind::Filter)?;
            BloomFilter::from_bytes(&filter_payload)?
        };

        let meta_payload = read_record(&mut file, file_len, footer.meta, BlockKind::Meta)?;
        let meta = TableMeta::decode(&meta_payload)?;

        let cache = options
            .cache
            .unwrap_or_else(|| Arc::new(BlockCache::new(crate::config::DEFAULT_CACHE_MAX_BYTES)));

        tracing::debug!(
            path = %path.display(),
            entries = meta.entries,
            blocks = index.len(),
            "opened sstable"
        );

        Ok(Self {
            path: Arc::new(path),
            file: Mutex::new(file),
            file_len,
            index,
            filter,
            meta,
            cache,
        })
    }

    /// Point lookup. `Ok(None)` means the key is absent; it is not an error.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.filter.might_contain(key) {
            return Ok(None);
        }
        let Some(entry) = self.index.find(key) else {
            return Ok(None);
        };
        let block = self.read_block(entry)?;
        block.get(key)
    }

    /// `false` means the key is definitely absent from this table.
    #[must_use]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.filter.might_contain(key)
    }

    /// Iterate entries within `range` in key order. Blocks are fetched
    /// through the cache; iterators are forward-only and non-restartable.
    pub fn scan<R>(&self, range: R) -> Result<ScanIterator<'_, R>>
    where
        R: RangeBounds<Vec<u8>>,
    {
        let start = clone_bound(range.start_bound());
        let blocks: Vec<IndexEntry> = self
            .index
            .blocks_for(as_slice_bound(range.start_bound()), as_slice_bound(range.end_bound()))
            .to_vec();
        let chain = BlockChain {
            reader: self,
            blocks,
            next_block: 0,
            current: None,
            seek_to: match start {
                Bound::Included(key) | Bound::Excluded(key) => Some(key),
                Bound::Unbounded => None,
            },
        };
        Ok(RangeFilter::new(chain, range))
    }

    /// Facts recorded in the table's meta block.
    pub fn metadata(&self) -> TableMetadata {
        TableMetadata {
            entries: self.meta.entries,
            unique_keys: self.meta.unique_keys,
            num_shards: self.meta.shard.num_shards,
            sharder_name: self.meta.shard.sharder_name.clone(),
            path: self.path.as_ref().clone(),
        }
    }

    pub(crate) fn table_meta(&self) -> &TableMeta {
        &self.meta
    }

    /// Fetch one data block, consulting the cache first. On a miss the raw
    /// record is read from the file, validated, decompressed, and inserted.
    fn read_block(&self, entry: &IndexEntry) -> Result<Arc<Block>> {
        let cache_key = CacheKey::new(Arc::clone(&self.path), entry.offset);
        if let Some(bytes) = self.cache.get(&cache_key) {
            return Ok(Arc::new(Block::new(bytes)?));
        }

        let handle = entry.handle();
        let record = {
            let mut file = self.file.lock()?;
            read_record_bytes(&mut file, self.file_len, handle)?
        };
        let payload: Arc<[u8]> = decode_block(&record, BlockKind::Data)?.into();
        self.cache.put(cache_key, Arc::clone(&payload));
        Ok(Arc::new(Block::new(payload)?))
    }
}

/// Iterator over a run of data blocks, loading each through the cache.
pub struct BlockChain<'a> {
    reader: &'a Reader,
    blocks: Vec<IndexEntry>,
    next_block: usize,
    current: Option<BlockIterator>,
    seek_to: Option<Vec<u8>>,
}

impl BlockChain<'_> {
    fn load_next_block(&mut self) -> Result<()> {
        if self.next_block >= self.blocks.len() {
            self.current = None;
            return Ok(());
        }
        let block = self.reader.read_block(&self.blocks[self.next_block])?;
        let mut iter = block.iter();
        // Only the first block can hold keys below the range start.
        if self.next_block == 0 {
            if let Some(start) = self.seek_to.take() {
                iter.seek(&start)?;
            }
        }
        self.current = Some(iter);
        self.next_block += 1;
        Ok(())
    }
}

impl Iterator for BlockChain<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(iter) = &mut self.current {
                if let Some(entry) = iter.next() {
                    return Some(entry);
                }
            } else if self.next_block >= self.blocks.len() {
                return None;
            }
            if let Err(e) = self.load_next_block() {
                self.current = None;
                self.next_block = self.blocks.len();
                return Some(Err(e));
            }
            self.current.as_ref()?;
        }
    }
}

/// A bounded scan over one table.
pub type ScanIterator<'a, R> = RangeFilter<BlockChain<'a>, R>;

fn clone_bound(bound: Bound<&Vec<u8>>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(key) => Bound::Included(key.clone()),
        Bound::Excluded(key) => Bound::Excluded(key.clone()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn as_slice_bound(bound: Bound<&Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(key) => Bound::Included(key.as_slice()),
        Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// Read a block record at `handle` and return its validated payload.
fn read_record(
    file: &mut File,
    file_len: u64,
    handle: BlockHandle,
    kind: BlockKind,
) -> Result<Vec<u8>> {
    let record = read_record_bytes(file, file_len, handle)?;
    decode_block(&record, kind)
}

fn read_record_bytes(file: &mut File, file_len: u64, handle: BlockHandle) -> Result<Vec<u8>> {
    let end = handle.offset.checked_add(u64::from(handle.length));
    if end.map_or(true, |end| end > file_len) {
        return Err(corruption!(
            "block out of bounds: offset {} length {} in {} byte file",
            handle.offset,
            handle.length,
            file_len
        ));
    }
    let mut record = vec![0u8; handle.length as usize];
    file.seek(SeekFrom::Start(handle.offset))?;
    file.read_exact(&mut record)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::error::Error;
    use crate::sstable::writer::Writer;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_table(path: &Path, config: TableConfig, count: usize) {
        let mut writer = Writer::create(path, config).unwrap();
        for i in 0..count {
            let key = format!("key_{i:05}");
            let value = format!("value_{i:05}");
            writer.add(key.as_bytes(), value.as_bytes()).unwrap();
        }
        writer.finish_and_close().unwrap();
    }

    #[test]
    fn test_get_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        write_table(&path, TableConfig::default(), 1000);

        let reader = Reader::open(&path).unwrap();
        for i in (0..1000).step_by(97) {
            let key = format!("key_{i:05}");
            let value = reader.get(key.as_bytes()).unwrap().unwrap();
            assert_eq!(value, format!("value_{i:05}").into_bytes());
        }
        assert!(reader.get(b"zzz").unwrap().is_none());
        assert!(reader.get(b"key_9999999").unwrap().is_none());
    }

    #[test]
    fn test_multi_block_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        // Small blocks force many of them.
        write_table(&path, TableConfig::default().block_size(256), 500);

        let reader = Reader::open(&path).unwrap();
        assert!(reader.index.len() > 1, "expected multiple blocks");
        for i in 0..500 {
            let key = format!("key_{i:05}");
            assert_eq!(
                reader.get(key.as_bytes()).unwrap().unwrap(),
                format!("value_{i:05}").into_bytes()
            );
        }
    }

    #[test]
    fn test_scan_full_and_bounded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        write_table(&path, TableConfig::default().block_size(256), 300);

        let reader = Reader::open(&path).unwrap();

        let all: Vec<_> = reader.scan(..).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(all.len(), 300);
        assert!(all.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(all[0].0, b"key_00000".to_vec());

        let range = b"key_00010".to_vec()..b"key_00020".to_vec();
        let bounded: Vec<_> = reader.scan(range).unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(bounded.len(), 10);
        assert_eq!(bounded[0].0, b"key_00010".to_vec());
        assert_eq!(bounded[9].0, b"key_00019".to_vec());
    }

    #[test]
    fn test_scan_empty_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        write_table(&path, TableConfig::default(), 10);

        let reader = Reader::open(&path).unwrap();
        let range = b"x".to_vec()..b"y".to_vec();
        assert_eq!(reader.scan(range).unwrap().count(), 0);
    }

    #[test]
    fn test_large_value_spans_own_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");

        let big = vec![0xabu8; 10 * 1024 * 1024];
        let mut writer = Writer::create(&path, TableConfig::default()).unwrap();
        writer.add(b"big", &big).unwrap();
        writer.add(b"small", b"v").unwrap();
        writer.finish_and_close().unwrap();

        let reader = Reader::open(&path).unwrap();
        assert_eq!(reader.index.len(), 2, "expected two data blocks");
        assert_eq!(reader.get(b"big").unwrap().unwrap(), big);
        assert_eq!(reader.get(b"small").unwrap().unwrap(), b"v".to_vec());
    }

    #[test]
    fn test_corrupt_data_block_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        write_table(&path, TableConfig::default().block_size(256), 500);

        let reader = Reader::open(&path).unwrap();
        let first_block = reader.index.entries()[0].clone();
        let last_key_block = reader.index.entries().last().unwrap().clone();
        drop(reader);

        // Flip one byte inside the first data block's payload.
        let mut bytes = fs::read(&path).unwrap();
        bytes[first_block.offset as usize + 14] ^= 0xff;
        let mut file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.write_all(&bytes).unwrap();
        drop(file);

        let reader = Reader::open(&path).unwrap();
        let err = reader.get(b"key_00000").unwrap_err();
        assert!(matches!(err, Error::Corruption(_)), "{err}");

        // Blocks other than the corrupted one still serve reads.
        assert!(last_key_block.offset != first_block.offset);
        assert!(reader.get(b"key_00499").unwrap().is_some());
    }

    #[test]
    fn test_corrupt_footer_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        write_table(&path, TableConfig::default(), 10);

        let mut bytes = fs::read(&path).unwrap();
        let len = bytes.len();
        bytes[len - 1] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let err = Reader::open(&path).unwrap_err();
        assert!(err.to_string().contains("bad footer magic"), "{err}");
    }

    #[test]
    fn test_too_small_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        fs::write(&path, b"not a table").unwrap();
        assert!(Reader::open(&path).is_err());
    }

    #[test]
    fn test_mmap_filter_sidecar() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        write_table(&path, TableConfig::default(), 100);

        let options = ReaderOptions {
            mmap_filter: true,
            ..Default::default()
        };
        let reader = Reader::open_with(&path, options).unwrap();
        assert!(reader.might_contain(b"key_00050"));
        assert_eq!(
            reader.get(b"key_00050").unwrap().unwrap(),
            b"value_00050".to_vec()
        );
    }

    #[test]
    fn test_shared_cache_reuses_blocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        write_table(&path, TableConfig::default().block_size(256), 200);

        let cache = Arc::new(BlockCache::new(1 << 20));
        let options = ReaderOptions {
            cache: Some(Arc::clone(&cache)),
            ..Default::default()
        };
        let reader = Reader::open_with(&path, options).unwrap();
        assert_eq!(cache.current_bytes(), 0);
        reader.get(b"key_00000").unwrap().unwrap();
        let after_first = cache.current_bytes();
        assert!(after_first > 0);
        // Re-reading the same block adds nothing.
        reader.get(b"key_00001").unwrap().unwrap();
        assert_eq!(cache.current_bytes(), after_first);
    }

    #[test]
    fn test_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        write_table(&path, TableConfig::default(), 42);

        let reader = Reader::open(&path).unwrap();
        let metadata = reader.metadata();
        assert_eq!(metadata.entries, 42);
        assert_eq!(metadata.unique_keys, 42);
        assert_eq!(metadata.num_shards, 1);
        assert_eq!(metadata.sharder_name, "none");
        assert_eq!(metadata.path, path);
    }

    #[test]
    fn test_random_binary_keys_round_trip() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");

        let mut rng = StdRng::seed_from_u64(0xB45A17);
        let mut keys: Vec<Vec<u8>> = (0..500)
            .map(|_| {
                let len = rng.gen_range(1..=32);
                (0..len).map(|_| rng.gen::<u8>()).collect()
            })
            .collect();
        keys.sort();
        keys.dedup();

        let mut writer =
            Writer::create(&path, TableConfig::default().block_size(512)).unwrap();
        for key in &keys {
            let mut value = key.clone();
            value.reverse();
            writer.add(key, &value).unwrap();
        }
        writer.finish_and_close().unwrap();

        let reader = Reader::open(&path).unwrap();
        for key in &keys {
            let mut expected = key.clone();
            expected.reverse();
            assert_eq!(reader.get(key).unwrap().unwrap(), expected);
        }
        // Absent keys probe the bloom filter and the block path.
        for _ in 0..200 {
            let len = rng.gen_range(33..=40);
            let absent: Vec<u8> = (0..len).map(|_| rng.gen::<u8>()).collect();
            assert_eq!(reader.get(&absent).unwrap(), None);
        }

        let scanned: Vec<Vec<u8>> =
            reader.scan(..).unwrap().map(|r| r.unwrap().0).collect();
        assert_eq!(scanned, keys);
    }

    #[test]
    fn test_concurrent_readers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.sst");
        write_table(&path, TableConfig::default().block_size(512), 1000);

        let reader = Arc::new(Reader::open(&path).unwrap());
        let mut handles = Vec::new();
        for t in 0..8usize {
            let reader = Arc::clone(&reader);
            handles.push(std::thread::spawn(move || {
                for i in (t..1000).step_by(8) {
                    let key = format!("key_{i:05}");
                    let value = reader.get(key.as_bytes()).unwrap().unwrap();
                    assert_eq!(value, format!("value_{i:05}").into_bytes());
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader").field("path", &self.path).finish()
    }
}
