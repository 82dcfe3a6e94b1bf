use std::io::Cursor;

use crate::corruption;
use crate::error::Result;

/// Default zstd compression level for data blocks.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Per-block compression codec. The block header records only whether the
/// stored payload is compressed; zstd is the sole compressed encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Store every block raw.
    None,
    /// Compress data blocks with zstd at the given level.
    Zstd { level: i32 },
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zstd {
            level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl Compression {
    /// Stable codec name recorded in the meta block.
    pub fn name(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Zstd { .. } => "zstd",
        }
    }

    /// Compress `input`, or `None` when the codec stores blocks raw. The
    /// caller keeps the raw payload unless the compressed form is strictly
    /// smaller.
    pub fn compress(&self, input: &[u8]) -> Result<Option<Vec<u8>>> {
        match self {
            Compression::None => Ok(None),
            Compression::Zstd { level } => {
                let compressed = zstd::encode_all(Cursor::new(input), *level)?;
                Ok(Some(compressed))
            }
        }
    }
}

/// Decompress a zstd block payload and verify it expands to exactly
/// `expected_len` bytes.
pub fn decompress(input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let output = zstd::decode_all(Cursor::new(input))?;
    if output.len() != expected_len {
        return Err(corruption!(
            "decompressed size mismatch: got {}, expected {}",
            output.len(),
            expected_len
        ));
    }
    Ok(output)
}
