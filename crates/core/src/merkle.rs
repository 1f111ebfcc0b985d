//! Merkle root over transaction ids.

use crate::hash::{hash_concat, Hash};

/// Compute the merkle root of a list of hashes.
///
/// Returns the zero hash if the list is empty. An odd element at any level
/// is paired with itself.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    merkle_root_checked(hashes).0
}

/// Compute the merkle root and report whether the tree is mutated.
///
/// Pairing the odd element with itself means `[a, b, c]` and `[a, b, c, c]`
/// share a root. A tree is flagged as mutated whenever two equal siblings
/// are hashed together, so a block can never be accepted under a root it
/// shares with a different transaction list.
pub fn merkle_root_checked(hashes: &[Hash]) -> (Hash, bool) {
    if hashes.is_empty() {
        return (Hash::ZERO, false);
    }

    let mut mutated = false;
    let mut level: Vec<Hash> = hashes.to_vec();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            match pair {
                [left, right] => {
                    if left == right {
                        mutated = true;
                    }
                    next.push(hash_concat(&[left.as_ref(), right.as_ref()]));
                }
                [odd] => next.push(hash_concat(&[odd.as_ref(), odd.as_ref()])),
                _ => unreachable!("chunks(2) yields one or two elements"),
            }
        }
        level = next;
    }

    (level[0], mutated)
}
