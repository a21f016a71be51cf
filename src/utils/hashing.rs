//! FNV-1a 32-bit hashing.
//!
//! Used to turn byte-channel keys and record type names into the 32-bit
//! identifiers carried by Data packets. It is fast and stable across
//! platforms but not collision resistant: two keys with the same hash share a
//! callback table entry.

const FNV_OFFSET_BASIS: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// FNV-1a over raw bytes
pub const fn fnv1a_32_bytes(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// FNV-1a over the UTF-8 bytes of `key`
pub const fn fnv1a_32(key: &str) -> u32 {
    fnv1a_32_bytes(key.as_bytes())
}
