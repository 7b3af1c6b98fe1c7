//! Merkle tree helpers for producing deterministic roots over block
//! contents.
//!
//! Behavior:
//! - An empty list of leaves yields the all-zero hash (`Hash::zero()`).
//! - Odd layers are padded by duplicating the last leaf before hashing.
//! - Tree construction is performed in-place to minimize allocations.

use crate::types::hash::Hash;

const EMPTY_ROOT: Hash = Hash::zero();
const MERKLE_NODE_SEPARATION: &[u8] = b"MERKLE_CHAIN_NODE";

/// Utility functions to build Merkle roots from leaf hashes.
pub struct MerkleTree;

impl MerkleTree {
    fn hash_pair(left: Hash, right: Hash) -> Hash {
        let mut h = Hash::keccak();
        h.update(MERKLE_NODE_SEPARATION);
        h.update(left.as_slice());
        h.update(right.as_slice());
        h.finalize()
    }

    /// Computes a Merkle root from the provided leaf hashes.
    ///
    /// This performs an in-place reduction; when a level has an odd number
    /// of nodes the last node is duplicated for hashing that pair.
    /// Returns the zero hash when `nodes` is empty.
    pub fn from_raw(mut nodes: Vec<Hash>) -> Hash {
        if nodes.is_empty() {
            return EMPTY_ROOT;
        }

        let mut len = nodes.len();

        while len > 1 {
            let mut write = 0;
            let mut read = 0;

            while read < len {
                let left = nodes[read];
                let right = if read + 1 < len { nodes[read + 1] } else { left };

                nodes[write] = Self::hash_pair(left, right);

                write += 1;
                read += 2;
            }

            len = write;
        }

        nodes[0]
    }

    /// Computes a Merkle root over arbitrary items via a leaf-hash closure.
    ///
    /// Returns the zero hash when `items` is empty.
    pub fn from_items<T>(items: &[T], leaf: impl Fn(&T) -> Hash) -> Hash {
        if items.is_empty() {
            return EMPTY_ROOT;
        }
        Self::from_raw(items.iter().map(leaf).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_leaf(data: &[u8]) -> Hash {
        Hash::of(data)
    }

    #[test]
    fn empty_returns_zero_hash() {
        assert_eq!(MerkleTree::from_raw(Vec::new()), Hash::zero());
    }

    #[test]
    fn single_leaf_returns_leaf() {
        let leaf = hash_leaf(b"leaf");
        assert_eq!(MerkleTree::from_raw(vec![leaf]), leaf);
    }

    #[test]
    fn even_number_of_leaves_matches_manual_reduction() {
        let a = hash_leaf(b"a");
        let b = hash_leaf(b"b");
        let c = hash_leaf(b"c");
        let d = hash_leaf(b"d");

        let level1 = [MerkleTree::hash_pair(a, b), MerkleTree::hash_pair(c, d)];
        let expected_root = MerkleTree::hash_pair(level1[0], level1[1]);

        assert_eq!(MerkleTree::from_raw(vec![a, b, c, d]), expected_root);
    }

    #[test]
    fn odd_number_of_leaves_duplicates_last_for_padding() {
        let a = hash_leaf(b"a");
        let b = hash_leaf(b"b");
        let c = hash_leaf(b"c");

        let level1 = [MerkleTree::hash_pair(a, b), MerkleTree::hash_pair(c, c)];
        let expected_root = MerkleTree::hash_pair(level1[0], level1[1]);

        assert_eq!(MerkleTree::from_raw(vec![a, b, c]), expected_root);
    }

    #[test]
    fn root_depends_on_leaf_order() {
        let a = hash_leaf(b"a");
        let b = hash_leaf(b"b");

        assert_ne!(
            MerkleTree::from_raw(vec![a, b]),
            MerkleTree::from_raw(vec![b, a])
        );
    }

    #[test]
    fn from_items_hashes_through_closure() {
        let items = [b"one".to_vec(), b"two".to_vec()];
        let by_items = MerkleTree::from_items(&items, |item| Hash::of(item));
        let by_raw = MerkleTree::from_raw(vec![Hash::of(b"one"), Hash::of(b"two")]);
        assert_eq!(by_items, by_raw);
    }

    #[test]
    fn from_items_empty_is_zero() {
        let items: [Vec<u8>; 0] = [];
        assert_eq!(MerkleTree::from_items(&items, |i| Hash::of(i)), Hash::zero());
    }
}
