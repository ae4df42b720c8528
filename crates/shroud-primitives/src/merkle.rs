//! Incremental note commitment trees.
//!
//! Only the append-and-root subset needed to validate chained anchors is
//! implemented; witness tracking lives with the wallet, not the node core.

use crate::{Anchor, NoteCommitment};
use bitcoin::hashes::{sha256, Hash};

/// An append-only merkle tree of fixed depth.
///
/// Stores one cached node per level, so memory stays O(depth) regardless of
/// how many commitments were appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalMerkleTree<const DEPTH: usize> {
    /// Cached left sibling per level, filled as appends ripple upwards.
    filled: Vec<Option<[u8; 32]>>,
    size: u64,
}

/// Sprout note commitment tree.
pub type SproutMerkleTree = IncrementalMerkleTree<29>;

/// Sapling note commitment tree.
pub type SaplingMerkleTree = IncrementalMerkleTree<32>;

impl<const DEPTH: usize> Default for IncrementalMerkleTree<DEPTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const DEPTH: usize> IncrementalMerkleTree<DEPTH> {
    pub fn new() -> Self {
        Self {
            filled: vec![None; DEPTH],
            size: 0,
        }
    }

    /// Append a commitment as the next leaf.
    ///
    /// # Panics
    ///
    /// Panics if the tree is full, which at practical depths cannot happen.
    pub fn append(&mut self, commitment: NoteCommitment) {
        assert!(self.size < 1u64 << DEPTH, "commitment tree is full");
        let mut node = *commitment.as_bytes();
        let mut position = self.size;
        for level in self.filled.iter_mut() {
            if position & 1 == 0 {
                *level = Some(node);
                break;
            }
            let left = level.take().expect("left sibling cached for odd position");
            node = combine(&left, &node);
            position >>= 1;
        }
        self.size += 1;
    }

    /// Root over the current leaves, padding empty subtrees.
    pub fn root(&self) -> Anchor {
        let mut empty = [0u8; 32];
        let mut node: Option<[u8; 32]> = None;
        let mut position = self.size;
        for level in self.filled.iter() {
            node = match (position & 1 == 1, node) {
                (true, Some(right)) => {
                    let left = level.expect("left sibling cached for odd position");
                    Some(combine(&left, &right))
                }
                (true, None) => {
                    let left = level.expect("left sibling cached for odd position");
                    Some(combine(&left, &empty))
                }
                (false, Some(left)) => Some(combine(&left, &empty)),
                (false, None) => None,
            };
            empty = combine(&empty, &empty);
            position >>= 1;
        }
        Anchor::from_bytes(node.unwrap_or(empty))
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

fn combine(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256::Hash::hash(&buf).to_byte_array()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cm(n: u8) -> NoteCommitment {
        NoteCommitment::from_bytes([n; 32])
    }

    #[test]
    fn empty_roots_differ_per_depth() {
        assert_ne!(SproutMerkleTree::new().root(), SaplingMerkleTree::new().root());
    }

    #[test]
    fn appends_change_the_root() {
        let mut tree = SproutMerkleTree::new();
        let empty = tree.root();
        tree.append(cm(1));
        let one = tree.root();
        tree.append(cm(2));
        let two = tree.root();
        assert_ne!(empty, one);
        assert_ne!(one, two);
    }

    #[test]
    fn root_is_order_dependent() {
        let mut a = SproutMerkleTree::new();
        a.append(cm(1));
        a.append(cm(2));
        let mut b = SproutMerkleTree::new();
        b.append(cm(2));
        b.append(cm(1));
        assert_ne!(a.root(), b.root());
    }
}
