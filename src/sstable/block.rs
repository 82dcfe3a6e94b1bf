use std::cmp::Ordering;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::codec::varint::{read_varint, write_varint};
use crate::corruption;
use crate::error::Result;

/// Builds one data block payload: prefix-compressed entries followed by the
/// restart array and its count. The caller wraps the payload in the outer
/// header/CRC framing.
pub struct BlockBuilder {
    restart_interval: usize,
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    entry_count: usize,
    first_key: Vec<u8>,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        Self {
            restart_interval: restart_interval.max(1),
            buffer: Vec::new(),
            restarts: Vec::new(),
            entry_count: 0,
            first_key: Vec::new(),
            last_key: Vec::new(),
        }
    }

    /// Append an entry. Keys must arrive in non-decreasing order; the writer
    /// enforces this before calling.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.entry_count % self.restart_interval == 0 {
            self.restarts.push(self.buffer.len() as u32);
            0
        } else {
            shared_prefix_len(&self.last_key, key)
        };
        let non_shared = key.len() - shared;

        write_varint(&mut self.buffer, shared as u32);
        write_varint(&mut self.buffer, non_shared as u32);
        write_varint(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        if self.entry_count == 0 {
            self.first_key = key.to_vec();
        }
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.entry_count += 1;
    }

    /// Seal the payload: restart offsets as big-endian u32, then the count.
    pub fn finish(mut self) -> Vec<u8> {
        for pos in &self.restarts {
            self.buffer.write_u32::<BigEndian>(*pos).unwrap();
        }
        self.buffer
            .write_u32::<BigEndian>(self.restarts.len() as u32)
            .unwrap();
        self.buffer
    }

    /// Approximate finished payload size, used to trigger block flushes.
    pub fn estimated_size(&self) -> usize {
        self.buffer.len() + 4 * self.restarts.len() + 4
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// First key appended to this block; the block's index key.
    pub fn first_key(&self) -> &[u8] {
        &self.first_key
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// A parsed data block payload: the entry region plus its restart offsets.
#[derive(Debug)]
pub struct Block {
    payload: Arc<[u8]>,
    entries_end: usize,
    restarts: Vec<u32>,
}

impl Block {
    /// Parse a block payload (entries + restart array + count). The outer
    /// framing has already been validated and decompressed.
    pub fn new(payload: Arc<[u8]>) -> Result<Self> {
        let len = payload.len();
        if len < 4 {
            return Err(corruption!("block truncated: {len} bytes"));
        }
        let num_restarts = BigEndian::read_u32(&payload[len - 4..]) as usize;
        let restart_array_len = num_restarts
            .checked_mul(4)
            .ok_or_else(|| corruption!("block truncated: restart count {num_restarts}"))?;
        if len - 4 < restart_array_len {
            return Err(corruption!(
                "block truncated: {num_restarts} restarts in {len} bytes"
            ));
        }
        let entries_end = len - 4 - restart_array_len;

        let mut restarts = Vec::with_capacity(num_restarts);
        for i in 0..num_restarts {
            let at = entries_end + i * 4;
            let pos = BigEndian::read_u32(&payload[at..at + 4]);
            if pos as usize > entries_end {
                return Err(corruption!("restart offset {pos} out of bounds"));
            }
            restarts.push(pos);
        }

        Ok(Self {
            payload,
            entries_end,
            restarts,
        })
    }

    /// Point lookup: binary-search the restart points, then scan forward
    /// until the reconstructed key meets or passes the target.
    pub fn get(self: &Arc<Self>, target: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut iter = Arc::clone(self).iter();
        iter.seek(target)?;
        match iter.next() {
            Some(Ok((key, value))) if key == target => Ok(Some(value)),
            Some(Err(e)) => Err(e),
            _ => Ok(None),
        }
    }

    pub fn iter(self: Arc<Self>) -> BlockIterator {
        BlockIterator::new(self)
    }

    fn entries(&self) -> &[u8] {
        &self.payload[..self.entries_end]
    }

    /// Key of the entry at a restart offset. Restart entries always encode
    /// `shared = 0`, so the key is materializable without prior context.
    fn restart_key(&self, offset: usize) -> Result<Vec<u8>> {
        let mut input = &self.entries()[offset..];
        let shared = read_varint(&mut input)? as usize;
        let non_shared = read_varint(&mut input)? as usize;
        let _value_len = read_varint(&mut input)?;
        if shared != 0 {
            return Err(corruption!("restart entry has shared prefix {shared}"));
        }
        if non_shared > input.len() {
            return Err(corruption!("block entry out of bounds"));
        }
        Ok(input[..non_shared].to_vec())
    }
}

/// Forward-only iterator over a block's entries.
pub struct BlockIterator {
    block: Arc<Block>,
    offset: usize,
    last_key: Vec<u8>,
}

impl BlockIterator {
    fn new(block: Arc<Block>) -> Self {
        let offset = block.restarts.first().map_or(0, |&p| p as usize);
        Self {
            block,
            offset,
            last_key: Vec::new(),
        }
    }

    /// Position the iterator so the next entry is the first key >= `target`.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        let restarts = &self.block.restarts;
        if restarts.is_empty() {
            self.offset = self.block.entries_end;
            return Ok(());
        }

        // Greatest restart whose first key is <= target.
        let mut left = 0usize;
        let mut right = restarts.len();
        while left < right {
            let mid = left + (right - left) / 2;
            let key = self.block.restart_key(restarts[mid] as usize)?;
            if key.as_slice() < target {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        self.offset = restarts[left.saturating_sub(1)] as usize;
        self.last_key.clear();

        loop {
            let checkpoint = (self.offset, self.last_key.clone());
            match self.next() {
                None => return Ok(()),
                Some(Err(e)) => return Err(e),
                Some(Ok((key, _))) if key.as_slice() >= target => {
                    (self.offset, self.last_key) = checkpoint;
                    return Ok(());
                }
                Some(Ok(_)) => {}
            }
        }
    }
}

impl Iterator for BlockIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.block.entries_end {
            return None;
        }
        let entries = self.block.entries();
        let mut input = &entries[self.offset..];

        let header = (|| -> Result<(usize, usize, usize)> {
            let shared = read_varint(&mut input)? as usize;
            let non_shared = read_varint(&mut input)? as usize;
            let value_len = read_varint(&mut input)? as usize;
            Ok((shared, non_shared, value_len))
        })();
        let (shared, non_shared, value_len) = match header {
            Ok(parts) => parts,
            Err(e) => return Some(Err(e)),
        };

        if shared > self.last_key.len() || non_shared + value_len > input.len() {
            return Some(Err(corruption!("block entry out of bounds")));
        }

        let mut key = Vec::with_capacity(shared + non_shared);
        key.extend_from_slice(&self.last_key[..shared]);
        key.extend_from_slice(&input[..non_shared]);
        let value = input[non_shared..non_shared + value_len].to_vec();

        self.offset = entries.len() - input.len() + non_shared + value_len;
        self.last_key.clear();
        self.last_key.extend_from_slice(&key);

        Some(Ok((key, value)))
    }
}
