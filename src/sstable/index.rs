use std::ops::Bound;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::codec::varint::{read_varint, write_varint};
use crate::corruption;
use crate::error::Result;
use crate::sstable::format::BlockHandle;

/// One index entry: the first key of a data block and the block's location.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub first_key: Vec<u8>,
    pub offset: u64,
    pub length: u32,
}

impl IndexEntry {
    pub fn handle(&self) -> BlockHandle {
        BlockHandle {
            offset: self.offset,
            length: self.length,
        }
    }
}

/// Sparse index over a table's data blocks, sorted by first key.
#[derive(Debug, Default)]
pub struct Index {
    entries: Vec<IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a block. Called in file order, so entries stay sorted.
    pub fn push(&mut self, first_key: Vec<u8>, offset: u64, length: u32) {
        self.entries.push(IndexEntry {
            first_key,
            offset,
            length,
        });
    }

    /// Greatest entry whose first key is <= `key`: the only block that can
    /// contain it.
    pub fn find(&self, key: &[u8]) -> Option<&IndexEntry> {
        let idx = self
            .entries
            .partition_point(|entry| entry.first_key.as_slice() <= key);
        if idx == 0 {
            None
        } else {
            Some(&self.entries[idx - 1])
        }
    }

    /// Contiguous run of blocks that can hold keys within the given bounds.
    pub fn blocks_for(&self, start: Bound<&[u8]>, end: Bound<&[u8]>) -> &[IndexEntry] {
        let lo = match start {
            Bound::Included(key) | Bound::Excluded(key) => self
                .entries
                .partition_point(|entry| entry.first_key.as_slice() <= key)
                .saturating_sub(1),
            Bound::Unbounded => 0,
        };
        let hi = match end {
            Bound::Included(key) => self
                .entries
                .partition_point(|entry| entry.first_key.as_slice() <= key),
            Bound::Excluded(key) => self
                .entries
                .partition_point(|entry| entry.first_key.as_slice() < key),
            Bound::Unbounded => self.entries.len(),
        };
        &self.entries[lo.min(hi)..hi]
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize: per entry, varint key length, key bytes, big-endian u64
    /// offset and u32 length.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            write_varint(&mut out, entry.first_key.len() as u32);
            out.extend_from_slice(&entry.first_key);
            out.write_u64::<BigEndian>(entry.offset).unwrap();
            out.write_u32::<BigEndian>(entry.length).unwrap();
        }
        out
    }

    /// Parse an index block payload, validating sort order.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut input = payload;
        let mut entries: Vec<IndexEntry> = Vec::new();
        while !input.is_empty() {
            let key_len = read_varint(&mut input)? as usize;
            if input.len() < key_len + 12 {
                return Err(corruption!("index entry truncated"));
            }
            let first_key = input[..key_len].to_vec();
            let offset = BigEndian::read_u64(&input[key_len..key_len + 8]);
            let length = BigEndian::read_u32(&input[key_len + 8..key_len + 12]);
            input = &input[key_len + 12..];

            if let Some(prev) = entries.last() {
                if first_key < prev.first_key {
                    return Err(corruption!("index keys out of order"));
                }
            }
            entries.push(IndexEntry {
                first_key,
                offset,
                length,
            });
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Index {
        let mut index = Index::new();
        index.push(b"apple".to_vec(), 64, 100);
        index.push(b"mango".to_vec(), 164, 120);
        index.push(b"peach".to_vec(), 284, 90);
        index
    }

    #[test]
    fn test_find() {
        let index = sample();
        assert!(index.find(b"aaa").is_none());
        assert_eq!(index.find(b"apple").unwrap().offset, 64);
        assert_eq!(index.find(b"banana").unwrap().offset, 64);
        assert_eq!(index.find(b"mango").unwrap().offset, 164);
        assert_eq!(index.find(b"nectarine").unwrap().offset, 164);
        assert_eq!(index.find(b"zzz").unwrap().offset, 284);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let index = sample();
        let decoded = Index::decode(&index.encode()).unwrap();
        assert_eq!(decoded.len(), 3);
        for (a, b) in decoded.entries().iter().zip(index.entries()) {
            assert_eq!(a.first_key, b.first_key);
            assert_eq!(a.offset, b.offset);
            assert_eq!(a.length, b.length);
        }
    }

    #[test]
    fn test_decode_empty() {
        let index = Index::decode(&[]).unwrap();
        assert!(index.is_empty());
        assert!(index.find(b"anything").is_none());
    }

    #[test]
    fn test_decode_rejects_unsorted() {
        let mut index = Index::new();
        index.push(b"zebra".to_vec(), 64, 10);
        index.push(b"apple".to_vec(), 74, 10);
        let err = Index::decode(&index.encode()).unwrap_err();
        assert!(err.to_string().contains("out of order"), "{err}");
    }

    #[test]
    fn test_decode_truncated() {
        let encoded = sample().encode();
        assert!(Index::decode(&encoded[..encoded.len() - 3]).is_err());
    }

    #[test]
    fn test_blocks_for_bounds() {
        let index = sample();

        let all = index.blocks_for(Bound::Unbounded, Bound::Unbounded);
        assert_eq!(all.len(), 3);

        // Start inside the second block.
        let tail = index.blocks_for(Bound::Included(b"nectarine"), Bound::Unbounded);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].first_key, b"mango");

        // End before the second block's first key excludes it.
        let head = index.blocks_for(Bound::Unbounded, Bound::Excluded(b"mango"));
        assert_eq!(head.len(), 1);
        assert_eq!(head[0].first_key, b"apple");

        // Inclusive end at a first key keeps that block.
        let head = index.blocks_for(Bound::Unbounded, Bound::Included(b"mango"));
        assert_eq!(head.len(), 2);

        // Start below every first key begins at block zero.
        let all = index.blocks_for(Bound::Included(b"aaa"), Bound::Unbounded);
        assert_eq!(all.len(), 3);

        // Empty range.
        let none = index.blocks_for(Bound::Included(b"x"), Bound::Excluded(b"a"));
        assert!(none.is_empty());
    }
}
