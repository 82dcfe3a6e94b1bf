use std::ops::Range;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::codec::hash::{murmur3_128, murmur3_32};
use crate::corruption;
use crate::errinput;
use crate::error::Result;
use crate::shard::ShardingFunction;

/// `shard = (murmur3_32(key) & 0x7FFFFFFF) % n`. Uniform, config-free, the
/// default choice.
pub struct ModSharder;

impl ShardingFunction for ModSharder {
    fn shard_of(&self, key: &[u8], num_shards: u32) -> u32 {
        (murmur3_32(key, 0) & 0x7FFF_FFFF) % num_shards
    }

    fn name(&self) -> &'static str {
        "mod"
    }

    fn config(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// `shard = (murmur3_128(key).h1 & 0x7FFF..FFFF) % n`. A 64-bit fingerprint
/// for workloads that want the strictest balance.
pub struct FingerprintSharder;

impl ShardingFunction for FingerprintSharder {
    fn shard_of(&self, key: &[u8], num_shards: u32) -> u32 {
        let (fingerprint, _) = murmur3_128(key, 0);
        ((fingerprint & 0x7FFF_FFFF_FFFF_FFFF) % u64::from(num_shards)) as u32
    }

    fn name(&self) -> &'static str {
        "fingerprint:v2"
    }

    fn config(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Range partitioning over sorted boundary keys. With boundaries
/// `B[0] < .. < B[n-2]`, shard `i` holds keys in `[B[i-1], B[i])` (open
/// ended at both extremes), so range scans touch a contiguous shard run.
pub struct RangeSharder {
    boundaries: Vec<Vec<u8>>,
}

impl RangeSharder {
    /// Build from sorted, distinct boundary keys; `n - 1` boundaries drive
    /// `n` shards.
    pub fn new(boundaries: Vec<Vec<u8>>) -> Result<Self> {
        if boundaries.is_empty() {
            return Err(errinput!("range sharder needs at least one boundary"));
        }
        for pair in boundaries.windows(2) {
            if pair[0] >= pair[1] {
                return Err(errinput!("range boundaries must be strictly ascending"));
            }
        }
        Ok(Self { boundaries })
    }

    /// Parse the config bytes recorded in a meta block:
    /// `[count: u32][len: u32][bytes]...`, all big-endian.
    pub fn from_config(config: &[u8]) -> Result<Self> {
        if config.len() < 4 {
            return Err(corruption!("range sharder config truncated"));
        }
        let count = BigEndian::read_u32(&config[0..4]) as usize;
        let mut input = &config[4..];
        let mut boundaries = Vec::with_capacity(count);
        for _ in 0..count {
            if input.len() < 4 {
                return Err(corruption!("range sharder config truncated"));
            }
            let len = BigEndian::read_u32(&input[0..4]) as usize;
            input = &input[4..];
            if input.len() < len {
                return Err(corruption!("range sharder config truncated"));
            }
            boundaries.push(input[..len].to_vec());
            input = &input[len..];
        }
        if !input.is_empty() {
            return Err(corruption!("trailing bytes in range sharder config"));
        }
        Self::new(boundaries).map_err(|e| corruption!("bad range sharder config: {e}"))
    }

    fn upper_bound(&self, key: &[u8]) -> u32 {
        self.boundaries
            .partition_point(|boundary| boundary.as_slice() <= key) as u32
    }
}

impl ShardingFunction for RangeSharder {
    fn shard_of(&self, key: &[u8], _num_shards: u32) -> u32 {
        self.upper_bound(key)
    }

    fn name(&self) -> &'static str {
        "range:v1"
    }

    fn config(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<BigEndian>(self.boundaries.len() as u32).unwrap();
        for boundary in &self.boundaries {
            out.write_u32::<BigEndian>(boundary.len() as u32).unwrap();
            out.extend_from_slice(boundary);
        }
        out
    }

    fn validate(&self, num_shards: u32) -> Result<()> {
        if num_shards == 0 {
            return Err(errinput!("num_shards must be positive"));
        }
        if num_shards as usize != self.boundaries.len() + 1 {
            return Err(errinput!(
                "range sharder with {} boundaries drives {} shards, not {num_shards}",
                self.boundaries.len(),
                self.boundaries.len() + 1
            ));
        }
        Ok(())
    }

    fn covering_shards(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        num_shards: u32,
    ) -> Range<u32> {
        let lo = start.map_or(0, |key| self.upper_bound(key));
        // The shard holding the end key can still contain keys below it.
        let hi = end.map_or(num_shards, |key| (self.upper_bound(key) + 1).min(num_shards));
        lo..hi.max(lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_sharder_in_range_and_deterministic() {
        for n in [1u32, 2, 4, 7, 64] {
            for i in 0..200 {
                let key = format!("key_{i}");
                let shard = ModSharder.shard_of(key.as_bytes(), n);
                assert!(shard < n);
                assert_eq!(shard, ModSharder.shard_of(key.as_bytes(), n));
            }
        }
    }

    #[test]
    fn test_mod_sharder_covers_all_shards() {
        let n = 8;
        let mut hit = vec![false; n as usize];
        for i in 0..10_000 {
            let key = format!("key_{i}");
            hit[ModSharder.shard_of(key.as_bytes(), n) as usize] = true;
        }
        assert!(hit.iter().all(|&h| h), "unreached shard: {hit:?}");
    }

    #[test]
    fn test_fingerprint_sharder_covers_all_shards() {
        let n = 8;
        let mut counts = vec![0usize; n as usize];
        for i in 0..10_000 {
            let key = format!("key_{i}");
            counts[FingerprintSharder.shard_of(key.as_bytes(), n) as usize] += 1;
        }
        assert!(counts.iter().all(|&c| c > 0), "skewed: {counts:?}");
    }

    #[test]
    fn test_fingerprint_differs_from_mod() {
        // Different hashes: the two sharders must not agree everywhere.
        let n = 16;
        let disagreements = (0..1000)
            .filter(|i| {
                let key = format!("key_{i}");
                ModSharder.shard_of(key.as_bytes(), n)
                    != FingerprintSharder.shard_of(key.as_bytes(), n)
            })
            .count();
        assert!(disagreements > 0);
    }

    #[test]
    fn test_range_sharder_routing() {
        let sharder =
            RangeSharder::new(vec![b"m".to_vec(), b"s".to_vec()]).unwrap();
        sharder.validate(3).unwrap();

        assert_eq!(sharder.shard_of(b"apple", 3), 0);
        assert_eq!(sharder.shard_of(b"lemon", 3), 0);
        assert_eq!(sharder.shard_of(b"m", 3), 1);
        assert_eq!(sharder.shard_of(b"mango", 3), 1);
        assert_eq!(sharder.shard_of(b"s", 3), 2);
        assert_eq!(sharder.shard_of(b"tomato", 3), 2);
    }

    #[test]
    fn test_range_boundary_maps_to_next_shard() {
        let boundaries = vec![b"b".to_vec(), b"d".to_vec(), b"f".to_vec()];
        let sharder = RangeSharder::new(boundaries.clone()).unwrap();
        for (i, boundary) in boundaries.iter().enumerate() {
            assert_eq!(sharder.shard_of(boundary, 4), i as u32 + 1);
        }
    }

    #[test]
    fn test_range_sharder_rejects_bad_boundaries() {
        assert!(RangeSharder::new(vec![]).is_err());
        assert!(RangeSharder::new(vec![b"b".to_vec(), b"a".to_vec()]).is_err());
        assert!(RangeSharder::new(vec![b"a".to_vec(), b"a".to_vec()]).is_err());
    }

    #[test]
    fn test_range_sharder_validate() {
        let sharder = RangeSharder::new(vec![b"m".to_vec()]).unwrap();
        assert!(sharder.validate(2).is_ok());
        assert!(sharder.validate(3).is_err());
        assert!(sharder.validate(0).is_err());
    }

    #[test]
    fn test_range_config_round_trip() {
        let sharder =
            RangeSharder::new(vec![b"kiwi".to_vec(), b"plum".to_vec()]).unwrap();
        let config = sharder.config();
        let parsed = RangeSharder::from_config(&config).unwrap();
        assert_eq!(parsed.boundaries, sharder.boundaries);
        assert_eq!(parsed.config(), config);
    }

    #[test]
    fn test_range_config_rejects_garbage() {
        assert!(RangeSharder::from_config(&[]).is_err());
        assert!(RangeSharder::from_config(&[0, 0, 0, 5]).is_err());
        // Valid config plus trailing junk.
        let mut config = RangeSharder::new(vec![b"m".to_vec()]).unwrap().config();
        config.push(0);
        assert!(RangeSharder::from_config(&config).is_err());
    }

    #[test]
    fn test_range_covering_shards() {
        let sharder =
            RangeSharder::new(vec![b"g".to_vec(), b"p".to_vec()]).unwrap();

        assert_eq!(sharder.covering_shards(None, None, 3), 0..3);
        assert_eq!(
            sharder.covering_shards(Some(b"q"), None, 3),
            2..3
        );
        assert_eq!(
            sharder.covering_shards(None, Some(b"c"), 3),
            0..1
        );
        assert_eq!(
            sharder.covering_shards(Some(b"h"), Some(b"k"), 3),
            1..2
        );
        // The default for hash sharders is every shard.
        assert_eq!(ModSharder.covering_shards(Some(b"a"), Some(b"b"), 4), 0..4);
    }

    #[test]
    fn test_hash_sharders_validate_zero() {
        assert!(ModSharder.validate(0).is_err());
        assert!(FingerprintSharder.validate(0).is_err());
        assert!(ModSharder.validate(1).is_ok());
    }
}
