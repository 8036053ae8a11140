//! RFC 6962 Merkle Tree Hashing
//!
//! Leaf and interior node hashes are domain-separated: a leaf hash is
//! `SHA-256(0x00 || data)` and an interior node is
//! `SHA-256(0x01 || left || right)`, so a leaf can never be confused with
//! a node covering the same bytes.

use sha2::{Digest, Sha256};

/// Size of every hash in the tree, in bytes
pub const HASH_SIZE: usize = 32;

/// A tree hash
pub type Hash = [u8; HASH_SIZE];

/// Leaf hash: `SHA-256(0x00 || data)`
pub fn leaf_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(data);
    hasher.finalize().into()
}

/// Interior node hash: `SHA-256(0x01 || left || right)`
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Largest power of two strictly less than `n`. Requires `n >= 2`.
pub fn prev_pow2(n: u64) -> u64 {
    debug_assert!(n >= 2);
    1 << (63 - (n - 1).leading_zeros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_separation() {
        // A leaf over x never collides with a node over (x, x)
        let x = [0xabu8; 32];
        assert_ne!(leaf_hash(&x), node_hash(&x, &x));
    }

    #[test]
    fn test_leaf_hash_matches_manual_prefix() {
        let data = b"statement";
        let mut hasher = Sha256::new();
        hasher.update([0u8]);
        hasher.update(data);
        let expected: Hash = hasher.finalize().into();
        assert_eq!(leaf_hash(data), expected);
    }

    #[test]
    fn test_prev_pow2() {
        assert_eq!(prev_pow2(2), 1);
        assert_eq!(prev_pow2(3), 2);
        assert_eq!(prev_pow2(4), 2);
        assert_eq!(prev_pow2(5), 4);
        assert_eq!(prev_pow2(256), 128);
        assert_eq!(prev_pow2(257), 256);
        assert_eq!(prev_pow2(1 << 40), 1 << 39);
    }
}
