//! On-disk framing shared by every block in a table file.
//!
//! A block record is:
//! ```text
//! +----------------------+-------------------+------------+
//! | header (12 bytes)    | payload           | crc32c (4) |
//! +----------------------+-------------------+------------+
//! ```
//! Header fields (big-endian): compressed size (u32), uncompressed size
//! (u32), block kind (u8), flags (u8, bit 0 = compressed), reserved (u16).
//! The CRC covers the header and the payload exactly as stored.
//!
//! The footer is a fixed 48 bytes at the end of the file: (offset, length)
//! handles for the index, filter, and meta blocks, a reserved word, and the
//! table magic as the final 8 bytes.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

use crate::codec::compress::{decompress, Compression};
use crate::codec::crc32c;
use crate::corruption;
use crate::error::Result;

/// "LBATSTLA": trailing magic of every table file.
pub const TABLE_MAGIC: u64 = 0x4154_5353_5441_424C;

/// Fixed footer width.
pub const FOOTER_LEN: u64 = 48;

/// Zero-filled pad reserved at the start of every file for a future
/// superblock. The first data block starts here.
pub const HEADER_PAD_LEN: u64 = 64;

/// Block record header width.
pub const BLOCK_HEADER_LEN: usize = 12;

/// Block record CRC trailer width.
pub const BLOCK_TRAILER_LEN: usize = 4;

const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Kind tag carried in every block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Data = 0,
    Index = 1,
    Filter = 2,
    Meta = 3,
}

impl BlockKind {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(BlockKind::Data),
            1 => Ok(BlockKind::Index),
            2 => Ok(BlockKind::Filter),
            3 => Ok(BlockKind::Meta),
            other => Err(corruption!("unknown block kind: {other}")),
        }
    }
}

/// Location of a block record within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub length: u32,
}

/// Frame a block payload into a full record: header, stored payload
/// (compressed when the codec produces a strictly smaller form; data blocks
/// only), CRC trailer.
pub fn encode_block(kind: BlockKind, payload: &[u8], compression: Compression) -> Result<Vec<u8>> {
    let compressed = match kind {
        BlockKind::Data => compression.compress(payload)?,
        _ => None,
    };
    let (flags, stored): (u8, &[u8]) = match &compressed {
        Some(bytes) if bytes.len() < payload.len() => (FLAG_COMPRESSED, bytes),
        _ => (0, payload),
    };

    let mut record = Vec::with_capacity(BLOCK_HEADER_LEN + stored.len() + BLOCK_TRAILER_LEN);
    record.write_u32::<BigEndian>(stored.len() as u32)?;
    record.write_u32::<BigEndian>(payload.len() as u32)?;
    record.push(kind as u8);
    record.push(flags);
    record.write_u16::<BigEndian>(0)?;
    record.extend_from_slice(stored);

    let crc = crc32c(&record);
    record.write_u32::<BigEndian>(crc)?;
    Ok(record)
}

/// Validate a full block record and return its uncompressed payload.
pub fn decode_block(record: &[u8], expected_kind: BlockKind) -> Result<Vec<u8>> {
    if record.len() < BLOCK_HEADER_LEN + BLOCK_TRAILER_LEN {
        return Err(corruption!("block truncated: {} bytes", record.len()));
    }
    let body_len = record.len() - BLOCK_TRAILER_LEN;
    let stored_crc = BigEndian::read_u32(&record[body_len..]);
    let actual_crc = crc32c(&record[..body_len]);
    if stored_crc != actual_crc {
        return Err(corruption!(
            "block CRC mismatch: stored {stored_crc:#010x}, computed {actual_crc:#010x}"
        ));
    }

    let mut header = &record[..BLOCK_HEADER_LEN];
    let compressed_len = header.read_u32::<BigEndian>()? as usize;
    let uncompressed_len = header.read_u32::<BigEndian>()? as usize;
    let kind = BlockKind::from_u8(header.read_u8()?)?;
    let flags = header.read_u8()?;

    if kind != expected_kind {
        return Err(corruption!(
            "unexpected block kind: found {kind:?}, expected {expected_kind:?}"
        ));
    }
    let stored = &record[BLOCK_HEADER_LEN..body_len];
    if compressed_len != stored.len() {
        return Err(corruption!(
            "block length mismatch: header says {compressed_len}, record holds {}",
            stored.len()
        ));
    }

    match flags {
        0 => {
            if uncompressed_len != stored.len() {
                return Err(corruption!(
                    "block length mismatch: raw block declares uncompressed size {uncompressed_len}"
                ));
            }
            Ok(stored.to_vec())
        }
        FLAG_COMPRESSED => decompress(stored, uncompressed_len),
        other => Err(corruption!("unknown block flags: {other:#04x}")),
    }
}

/// Parsed table footer.
#[derive(Debug, Clone, Copy)]
pub struct Footer {
    pub index: BlockHandle,
    pub filter: BlockHandle,
    pub meta: BlockHandle,
}

impl Footer {
    /// Encode to the fixed 48-byte wire form.
    pub fn encode(&self) -> [u8; FOOTER_LEN as usize] {
        let mut out = [0u8; FOOTER_LEN as usize];
        BigEndian::write_u64(&mut out[0..8], self.index.offset);
        BigEndian::write_u32(&mut out[8..12], self.index.length);
        BigEndian::write_u64(&mut out[12..20], self.filter.offset);
        BigEndian::write_u32(&mut out[20..24], self.filter.length);
        BigEndian::write_u64(&mut out[24..32], self.meta.offset);
        BigEndian::write_u32(&mut out[32..36], self.meta.length);
        // out[36..40] reserved, pads the footer to its fixed width.
        BigEndian::write_u64(&mut out[40..48], TABLE_MAGIC);
        out
    }

    /// Decode and validate the trailing magic.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FOOTER_LEN as usize {
            return Err(corruption!("footer truncated: {} bytes", bytes.len()));
        }
        let magic = BigEndian::read_u64(&bytes[40..48]);
        if magic != TABLE_MAGIC {
            return Err(corruption!("bad footer magic: {magic:#018x}"));
        }
        Ok(Self {
            index: BlockHandle {
                offset: BigEndian::read_u64(&bytes[0..8]),
                length: BigEndian::read_u32(&bytes[8..12]),
            },
            filter: BlockHandle {
                offset: BigEndian::read_u64(&bytes[12..20]),
                length: BigEndian::read_u32(&bytes[20..24]),
            },
            meta: BlockHandle {
                offset: BigEndian::read_u64(&bytes[24..32]),
                length: BigEndian::read_u32(&bytes[32..36]),
            },
        })
    }
}
