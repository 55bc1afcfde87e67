use crate::types::Key;

/// FNV-1a hash of a key's little-endian bytes.
///
/// Both shard selection inside a server and key→node routing take this
/// hash modulo a count, and every process in the cluster must map a key
/// to the same owner. A fixed algorithm over fixed bytes guarantees that;
/// the std `RandomState` hasher would not.
pub fn key_hash(key: Key) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325; // FNV-1a offset basis
    for b in key.to_le_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(key_hash(42), key_hash(42));
        assert_eq!(key_hash(0), key_hash(0));
    }

    #[test]
    fn test_different_keys_differ() {
        assert_ne!(key_hash(1), key_hash(2));
        assert_ne!(key_hash(0), key_hash(u64::MAX));
    }

    #[test]
    fn test_spreads_sequential_keys() {
        // Sequential keys must not land in the same bucket; check that
        // 10k consecutive keys fill 16 buckets within a loose bound.
        let buckets = 16u64;
        let mut counts = [0usize; 16];
        for key in 0..10_000u64 {
            counts[(key_hash(key) % buckets) as usize] += 1;
        }
        let min = *counts.iter().min().unwrap();
        let max = *counts.iter().max().unwrap();
        assert!(
            max < min * 2,
            "bucket skew too high: min={min}, max={max}"
        );
    }
}
