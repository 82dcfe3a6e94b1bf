//! Sharding: one logical table split across N shard files.
//!
//! A shard file set `<base>-00000-of-00004.sst` .. `<base>-00003-of-00004.sst`
//! jointly satisfies the table contract. A [`ShardingFunction`] routes every
//! key to exactly one shard, deterministically and stably forever for a
//! given `(name, config)` identity; the identity is recorded in every
//! shard's meta block and re-verified on open.

pub mod reader;
pub mod sharder;
pub mod writer;

pub use reader::ShardedReader;
pub use sharder::{FingerprintSharder, ModSharder, RangeSharder};
pub use writer::ShardedWriter;

use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::errinput;
use crate::error::Result;

/// Routes keys to shards. Implementations must be pure functions of the
/// key: the assignment is burned into published files.
pub trait ShardingFunction: Send + Sync {
    /// Shard index in `[0, num_shards)` for `key`. `num_shards` has been
    /// validated (non-zero, compatible with the sharder's config).
    fn shard_of(&self, key: &[u8], num_shards: u32) -> u32;

    /// Stable identifier recorded in each shard's meta block.
    fn name(&self) -> &'static str;

    /// Serialized configuration, also recorded in meta. Empty for
    /// config-free sharders.
    fn config(&self) -> Vec<u8>;

    /// Check that this sharder can drive `num_shards` shards.
    fn validate(&self, num_shards: u32) -> Result<()> {
        if num_shards == 0 {
            return Err(errinput!("num_shards must be positive"));
        }
        Ok(())
    }

    /// Shards that can hold keys from `[start, end)`. Hash sharders
    /// scatter, so the default covers everything; the range sharder
    /// narrows.
    fn covering_shards(
        &self,
        _start: Option<&[u8]>,
        _end: Option<&[u8]>,
        num_shards: u32,
    ) -> Range<u32> {
        0..num_shards
    }
}

/// Reconstruct a sharder from the identity recorded in a meta block.
pub fn sharder_from_meta(name: &str, config: &[u8]) -> Result<Box<dyn ShardingFunction>> {
    match name {
        "mod" => Ok(Box::new(ModSharder)),
        "fingerprint:v2" => Ok(Box::new(FingerprintSharder)),
        "range:v1" => Ok(Box::new(RangeSharder::from_config(config)?)),
        other => Err(errinput!("unknown sharder: {other:?}")),
    }
}

/// `<base>-SSSSS-of-NNNNN.sst`.
pub fn shard_path(base: &Path, shard: u32, num_shards: u32) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(format!("-{shard:05}-of-{num_shards:05}.sst"));
    PathBuf::from(name)
}

/// Parse a shard file name into (base name, shard index, shard count).
pub fn parse_shard_file_name(file_name: &str) -> Option<(&str, u32, u32)> {
    let stem = file_name.strip_suffix(".sst")?;
    // {base}-{shard:05}-of-{total:05}
    if !stem.is_ascii() || stem.len() < 5 + 4 + 5 + 1 {
        return None;
    }
    let (rest, total) = stem.split_at(stem.len() - 5);
    let rest = rest.strip_suffix("-of-")?;
    if rest.len() < 6 {
        return None;
    }
    let (base_dash, shard) = rest.split_at(rest.len() - 5);
    let base = base_dash.strip_suffix('-')?;
    if base.is_empty()
        || !shard.bytes().all(|b| b.is_ascii_digit())
        || !total.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    Some((base, shard.parse().ok()?, total.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_path_format() {
        let path = shard_path(Path::new("/data/events"), 3, 12);
        assert_eq!(path, PathBuf::from("/data/events-00003-of-00012.sst"));
    }

    #[test]
    fn test_parse_shard_file_name() {
        assert_eq!(
            parse_shard_file_name("events-00003-of-00012.sst"),
            Some(("events", 3, 12))
        );
        assert_eq!(
            parse_shard_file_name("a-b-00000-of-00002.sst"),
            Some(("a-b", 0, 2))
        );
        assert_eq!(parse_shard_file_name("events.sst"), None);
        assert_eq!(parse_shard_file_name("events-3-of-12.sst"), None);
        assert_eq!(parse_shard_file_name("events-0000x-of-00012.sst"), None);
        assert_eq!(parse_shard_file_name("-00000-of-00001.sst"), None);
    }

    #[test]
    fn test_round_trip_naming() {
        let path = shard_path(Path::new("t"), 0, 1);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert_eq!(parse_shard_file_name(name), Some(("t", 0, 1)));
    }

    #[test]
    fn test_sharder_from_meta() {
        assert_eq!(sharder_from_meta("mod", &[]).unwrap().name(), "mod");
        assert_eq!(
            sharder_from_meta("fingerprint:v2", &[]).unwrap().name(),
            "fingerprint:v2"
        );
        assert!(sharder_from_meta("md5", &[]).is_err());
    }
}
