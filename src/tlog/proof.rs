//! RFC 6962 Inclusion and Consistency Proofs
//!
//! Generation walks stored tiles through a `TileReader`; verification is
//! pure computation over the supplied hashes.
//!
//! Proof element ordering follows the `golang.org/x/mod/sumdb/tlog`
//! contract, so proofs generated here check out under that library's
//! verifier and vice versa. Structural problems (bad indexes, wrong proof
//! length) surface as errors; a well-formed proof that fails to reproduce
//! the claimed root yields `Ok(false)`.

use super::hash::{leaf_hash, node_hash, prev_pow2, Hash};
use super::log::TileReader;
use super::TlogError;

/// Generate the inclusion proof for leaf `index` in the tree of size
/// `tree_size`: sibling subtree hashes ordered leaf-to-root. Empty for a
/// single-leaf tree.
pub(crate) async fn inclusion_proof(
    reader: &mut TileReader<'_>,
    index: u64,
    tree_size: u64,
) -> Result<Vec<Hash>, TlogError> {
    if index >= tree_size {
        return Err(TlogError::InvalidIndex { index, tree_size });
    }

    // Descend from the root range [0, tree_size), collecting the sibling
    // of whichever half holds the leaf; reverse for leaf-to-root order.
    let mut proof = Vec::new();
    let mut lo = 0u64;
    let mut hi = tree_size;
    while hi - lo > 1 {
        let k = prev_pow2(hi - lo);
        if index < lo + k {
            proof.push(reader.range_hash(lo + k, hi).await?);
            hi = lo + k;
        } else {
            proof.push(reader.range_hash(lo, lo + k).await?);
            lo += k;
        }
    }
    proof.reverse();
    Ok(proof)
}

/// Generate the consistency proof between tree sizes `old_size` and
/// `new_size`. Empty when the sizes are equal.
pub(crate) async fn consistency_proof(
    reader: &mut TileReader<'_>,
    old_size: u64,
    new_size: u64,
) -> Result<Vec<Hash>, TlogError> {
    if old_size == 0 || old_size > new_size {
        return Err(TlogError::InvalidRange {
            from: old_size,
            to: new_size,
        });
    }
    if old_size == new_size {
        return Ok(Vec::new());
    }

    // Descend toward the old tree's right boundary. Each level's sibling
    // hash belongs after the recursive result, so the descent is collected
    // forward and appended in reverse.
    let mut descent = Vec::new();
    let mut lo = 0u64;
    let mut hi = new_size;
    loop {
        if old_size == hi {
            let mut proof = if lo == 0 {
                Vec::new()
            } else {
                vec![reader.range_hash(lo, hi).await?]
            };
            descent.reverse();
            proof.extend(descent);
            return Ok(proof);
        }
        let k = prev_pow2(hi - lo);
        if old_size <= lo + k {
            descent.push(reader.range_hash(lo + k, hi).await?);
            hi = lo + k;
        } else {
            descent.push(reader.range_hash(lo, lo + k).await?);
            lo += k;
        }
    }
}

/// Verify an inclusion proof for `leaf` (the 32-byte logged value) at
/// `index` in a tree of `tree_size` with the given `root`.
///
/// Returns `Ok(false)` on hash mismatch; errors only for structural
/// problems (index out of range, wrong proof length).
pub fn verify_inclusion(
    index: u64,
    tree_size: u64,
    leaf: &Hash,
    proof: &[Hash],
    root: &Hash,
) -> Result<bool, TlogError> {
    if index >= tree_size {
        return Err(TlogError::InvalidIndex { index, tree_size });
    }

    let mut fork = index;
    let mut last = tree_size - 1;
    let mut current = leaf_hash(leaf);

    for sibling in proof {
        if last == 0 {
            return Err(TlogError::MalformedProof(format!(
                "proof longer than the path for index {} in tree of {}",
                index, tree_size
            )));
        }
        if fork & 1 == 1 || fork == last {
            current = node_hash(sibling, &current);
            if fork & 1 == 0 {
                while fork & 1 == 0 && fork != 0 {
                    fork >>= 1;
                    last >>= 1;
                }
            }
        } else {
            current = node_hash(&current, sibling);
        }
        fork >>= 1;
        last >>= 1;
    }

    if last != 0 {
        return Err(TlogError::MalformedProof(format!(
            "proof of {} elements too short for index {} in tree of {}",
            proof.len(),
            index,
            tree_size
        )));
    }
    Ok(current == *root)
}

/// Verify a consistency proof between `old_size` with `old_root` and
/// `new_size` with `new_root`.
pub fn verify_consistency(
    old_size: u64,
    new_size: u64,
    proof: &[Hash],
    old_root: &Hash,
    new_root: &Hash,
) -> Result<bool, TlogError> {
    if old_size == 0 || old_size > new_size {
        return Err(TlogError::InvalidRange {
            from: old_size,
            to: new_size,
        });
    }
    if old_size == new_size {
        if !proof.is_empty() {
            return Err(TlogError::MalformedProof(
                "proof between equal sizes must be empty".to_string(),
            ));
        }
        return Ok(old_root == new_root);
    }

    let (derived_old, derived_new) = reconstruct(proof, 0, new_size, old_size, old_root)?;
    Ok(derived_old == *old_root && derived_new == *new_root)
}

/// Rebuild (old root, new root) from the proof over the range `[lo, hi)`,
/// consuming proof elements from the end.
fn reconstruct(
    proof: &[Hash],
    lo: u64,
    hi: u64,
    old_size: u64,
    old_root: &Hash,
) -> Result<(Hash, Hash), TlogError> {
    if old_size == hi {
        if lo == 0 {
            if !proof.is_empty() {
                return Err(TlogError::MalformedProof(
                    "trailing elements beyond the old root".to_string(),
                ));
            }
            return Ok((*old_root, *old_root));
        }
        match proof {
            [hash] => return Ok((*hash, *hash)),
            _ => {
                return Err(TlogError::MalformedProof(format!(
                    "expected exactly one subtree hash, got {}",
                    proof.len()
                )))
            }
        }
    }

    let (tail, rest) = proof
        .split_last()
        .ok_or_else(|| TlogError::MalformedProof("proof too short".to_string()))?;
    let k = prev_pow2(hi - lo);
    if old_size <= lo + k {
        let (old, new) = reconstruct(rest, lo, lo + k, old_size, old_root)?;
        Ok((old, node_hash(&new, tail)))
    } else {
        let (old, new) = reconstruct(rest, lo + k, hi, old_size, old_root)?;
        Ok((node_hash(tail, &old), node_hash(tail, &new)))
    }
}
