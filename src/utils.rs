//! Utility functions shared by the transformation builders.
//!
//! Surrogate-key hashing and numeric rounding used by dimension and fact
//! construction. Both must be deterministic: rebuilds reproduce identical
//! keys and aggregates from unchanged raw data.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Derive a stable surrogate key from a natural key string.
///
/// FNV-1a 64-bit, masked to a non-negative i64 so keys can never collide
/// with the -1 "unresolved" sentinel. Same input always yields the same
/// key, across runs and across processes.
#[must_use]
pub fn surrogate_key(natural: &str) -> i64 {
    let mut hash = FNV_OFFSET;
    for byte in natural.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash & 0x7fff_ffff_ffff_ffff) as i64
}

/// Round a value to two decimal places.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surrogate_key_is_stable() {
        let a = surrogate_key("tikvah_pharma");
        let b = surrogate_key("tikvah_pharma");
        assert_eq!(a, b);
    }

    #[test]
    fn test_surrogate_key_is_non_negative() {
        for name in ["chemed", "lobelia_cosmetics", "tikvah_pharma", ""] {
            assert!(surrogate_key(name) >= 0);
        }
    }

    #[test]
    fn test_distinct_names_get_distinct_keys() {
        assert_ne!(surrogate_key("chemed"), surrogate_key("lobelia_cosmetics"));
    }

    #[test]
    fn test_round2() {
        assert!((round2(3.14159) - 3.14).abs() < f64::EPSILON);
        assert!((round2(2.5) - 2.5).abs() < f64::EPSILON);
    }
}
