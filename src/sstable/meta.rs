use std::path::PathBuf;

use crate::corruption;
use crate::error::Result;

/// Sharder identity recorded in every shard of a sharded table. All shards
/// must carry the same triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardManifest {
    pub sharder_name: String,
    pub sharder_config: Vec<u8>,
    pub num_shards: u32,
}

impl Default for ShardManifest {
    fn default() -> Self {
        Self {
            sharder_name: "none".to_string(),
            sharder_config: Vec::new(),
            num_shards: 1,
        }
    }
}

/// Contents of the meta block: a small `key=value` line payload.
#[derive(Debug, Clone)]
pub struct TableMeta {
    pub creator: String,
    pub entries: u64,
    pub unique_keys: u64,
    pub compression: String,
    pub shard: ShardManifest,
}

impl TableMeta {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("creator={}\n", self.creator));
        out.push_str(&format!("entries={}\n", self.entries));
        out.push_str(&format!("unique_keys={}\n", self.unique_keys));
        out.push_str(&format!("compression={}\n", self.compression));
        out.push_str(&format!("sharder={}\n", self.shard.sharder_name));
        out.push_str(&format!(
            "sharder_config={}\n",
            hex_encode(&self.shard.sharder_config)
        ));
        out.push_str(&format!("num_shards={}\n", self.shard.num_shards));
        out.into_bytes()
    }

    /// Parse a meta block payload. Unknown keys are ignored so the format
    /// can grow without breaking old readers.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| corruption!("meta block is not utf-8"))?;

        let mut meta = TableMeta {
            creator: String::new(),
            entries: 0,
            unique_keys: 0,
            compression: "none".to_string(),
            shard: ShardManifest::default(),
        };
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "creator" => meta.creator = value.to_string(),
                "entries" => meta.entries = parse_u64(key, value)?,
                "unique_keys" => meta.unique_keys = parse_u64(key, value)?,
                "compression" => meta.compression = value.to_string(),
                "sharder" => meta.shard.sharder_name = value.to_string(),
                "sharder_config" => meta.shard.sharder_config = hex_decode(value)?,
                "num_shards" => meta.shard.num_shards = parse_u64(key, value)? as u32,
                _ => {}
            }
        }
        Ok(meta)
    }
}

/// Table facts reported to callers.
#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub entries: u64,
    pub unique_keys: u64,
    pub num_shards: u32,
    pub sharder_name: String,
    pub path: PathBuf,
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| corruption!("meta field {key} is not a number: {value:?}"))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 || !text.is_ascii() {
        return Err(corruption!("malformed hex in meta block"));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| corruption!("bad hex in meta block: {:?}", &text[i..i + 2]))
        })
        .collect()
}
