//! MurmurHash3, pinned in-crate.
//!
//! Shard routing and bloom probes are burned into published files forever,
//! so the hash implementations live here rather than behind a dependency
//! whose output could drift across versions or platforms.

/// MurmurHash3 x86_32.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u32;
        for (i, &byte) in tail.iter().enumerate() {
            k |= u32::from(byte) << (8 * i);
        }
        k = k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h ^= k;
    }

    h ^= data.len() as u32;
    fmix32(h)
}

/// MurmurHash3 x64_128. Returns `(h1, h2)`; `h1` is the leading 64 bits
/// used as the fingerprint.
pub fn murmur3_128(data: &[u8], seed: u32) -> (u64, u64) {
    const C1: u64 = 0x87c3_7b91_1142_53d5;
    const C2: u64 = 0x4cf5_ad43_2745_937f;

    let mut h1 = u64::from(seed);
    let mut h2 = u64::from(seed);

    let mut chunks = data.chunks_exact(16);
    for chunk in &mut chunks {
        let k1 = u64::from_le_bytes(chunk[0..8].try_into().unwrap());
        let k2 = u64::from_le_bytes(chunk[8..16].try_into().unwrap());

        h1 ^= mix_k1(k1);
        h1 = h1
            .rotate_left(27)
            .wrapping_add(h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        h2 ^= mix_k2(k2);
        h2 = h2
            .rotate_left(31)
            .wrapping_add(h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    let tail = chunks.remainder();
    if tail.len() > 8 {
        let mut k2 = 0u64;
        for (i, &byte) in tail[8..].iter().enumerate() {
            k2 |= u64::from(byte) << (8 * i);
        }
        h2 ^= mix_k2(k2);
    }
    if !tail.is_empty() {
        let mut k1 = 0u64;
        for (i, &byte) in tail.iter().take(8).enumerate() {
            k1 |= u64::from(byte) << (8 * i);
        }
        h1 ^= mix_k1(k1);
    }

    let len = data.len() as u64;
    h1 ^= len;
    h2 ^= len;
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    h1 = fmix64(h1);
    h2 = fmix64(h2);
    h1 = h1.wrapping_add(h2);
    h2 = h2.wrapping_add(h1);
    (h1, h2)
}

fn mix_k1(k: u64) -> u64 {
    k.wrapping_mul(0x87c3_7b91_1142_53d5)
        .rotate_left(31)
        .wrapping_mul(0x4cf5_ad43_2745_937f)
}

fn mix_k2(k: u64) -> u64 {
    k.wrapping_mul(0x4cf5_ad43_2745_937f)
        .rotate_left(33)
        .wrapping_mul(0x87c3_7b91_1142_53d5)
}

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur3_32_reference_vectors() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 0x514E28B7);
        assert_eq!(murmur3_32(b"hello", 0), 0x248BFA47);
    }

    #[test]
    fn test_murmur3_128_empty() {
        assert_eq!(murmur3_128(b"", 0), (0, 0));
    }

    #[test]
    fn test_deterministic() {
        let key = b"row:0042/col:name";
        assert_eq!(murmur3_32(key, 0), murmur3_32(key, 0));
        assert_eq!(murmur3_128(key, 0), murmur3_128(key, 0));
        assert_ne!(murmur3_32(key, 0), murmur3_32(key, 4));
    }

    #[test]
    fn test_tail_lengths() {
        // Every remainder length 0..=15 exercises a distinct tail path.
        let data: Vec<u8> = (0u8..64).collect();
        let mut seen_32 = std::collections::HashSet::new();
        let mut seen_128 = std::collections::HashSet::new();
        for len in 0..=16 {
            seen_32.insert(murmur3_32(&data[..len], 0));
            seen_128.insert(murmur3_128(&data[..len], 0));
        }
        assert_eq!(seen_32.len(), 17);
        assert_eq!(seen_128.len(), 17);
    }
}
