//! K-way merge of sorted key/value streams.
//!
//! A min-heap holds the head entry of every source; popping the minimum and
//! refilling from its source yields the union in key order with one
//! comparison per step. Ties are broken by source index, so the merge is
//! stable. Nothing is deduplicated: a table may hold several versions of a
//! key, and shard streams never overlap anyway.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Error, Result};

/// A boxed sorted stream feeding the merge.
pub type KvIterator<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + Send + 'a>;

struct HeapEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed on both fields: BinaryHeap is a max-heap, and the merge
        // needs the smallest key (then the smallest source) on top.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

pub struct MergeIterator<'a> {
    sources: Vec<KvIterator<'a>>,
    heap: BinaryHeap<HeapEntry>,
    pending_error: Option<Error>,
}

impl<'a> MergeIterator<'a> {
    pub fn new(mut sources: Vec<KvIterator<'a>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        let mut pending_error = None;
        for (source, iter) in sources.iter_mut().enumerate() {
            match iter.next() {
                Some(Ok((key, value))) => heap.push(HeapEntry { key, value, source }),
                Some(Err(e)) => pending_error = Some(e),
                None => {}
            }
        }
        Self {
            sources,
            heap,
            pending_error,
        }
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            return Some(Err(e));
        }
        let entry = self.heap.pop()?;
        match self.sources[entry.source].next() {
            Some(Ok((key, value))) => self.heap.push(HeapEntry {
                key,
                value,
                source: entry.source,
            }),
            // Yield the popped entry now; surface the error on the next call.
            Some(Err(e)) => self.pending_error = Some(e),
            None => {}
        }
        Some(Ok((entry.key, entry.value)))
    }
}
