//! Fixed-depth sparse Merkle tree.
//!
//! ## Design
//!
//! Nodes are addressed by `(level, index)` where level 0 is the leaf row
//! and `level == depth` is the root; the node covering a leaf at level
//! `l` has index `leaf_index >> l`. Only non-default nodes are stored,
//! every absent node hashes to the per-level empty-subtree default, so
//! a tree with a handful of occupied leaves stays small at depth 24.
//!
//! Mutations can be journaled: `begin` starts recording the prior value
//! of every touched node, `rollback` restores them and `commit` drops
//! the journal. This is what makes a failed state transition leave the
//! root exactly where it was.

use std::collections::HashMap;

use crate::tree::hasher::{default_hashes, hash_pair};
use crate::types::Hash;

/// Sparse Merkle tree over `2^depth` leaf slots.
#[derive(Debug, Clone)]
pub struct Smt {
    depth: usize,
    nodes: HashMap<(u8, u64), Hash>,
    defaults: Vec<Hash>,
    /// First-touch prior values for the journaled mutation in progress;
    /// `None` means the node was absent (default).
    journal: Option<HashMap<(u8, u64), Option<Hash>>>,
}

impl Smt {
    pub fn new(depth: usize) -> Self {
        debug_assert!(depth > 0 && depth <= 64);
        Self {
            depth,
            nodes: HashMap::new(),
            defaults: default_hashes(depth),
            journal: None,
        }
    }

    /// Root of an empty tree of the given depth, without building one.
    pub fn empty_root(depth: usize) -> Hash {
        default_hashes(depth)[depth]
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root(&self) -> Hash {
        self.node(self.depth as u8, 0)
    }

    fn node(&self, level: u8, index: u64) -> Hash {
        self.nodes
            .get(&(level, index))
            .copied()
            .unwrap_or(self.defaults[level as usize])
    }

    fn write_node(&mut self, level: u8, index: u64, hash: Hash) {
        let prior = self.nodes.get(&(level, index)).copied();
        if let Some(journal) = self.journal.as_mut() {
            journal.entry((level, index)).or_insert(prior);
        }
        if hash == self.defaults[level as usize] {
            self.nodes.remove(&(level, index));
        } else {
            self.nodes.insert((level, index), hash);
        }
    }

    /// Set the hash of the leaf at `index` and recompute the path to the
    /// root.
    pub fn set_leaf(&mut self, index: u64, leaf_hash: Hash) {
        debug_assert!(self.depth == 64 || index < (1u64 << self.depth));
        self.write_node(0, index, leaf_hash);
        for level in 1..=self.depth as u8 {
            let parent = index >> level;
            let left = self.node(level - 1, parent << 1);
            let right = self.node(level - 1, (parent << 1) | 1);
            self.write_node(level, parent, hash_pair(&left, &right));
        }
    }

    /// Sibling path for the leaf at `index`, leaf to root.
    pub fn prove(&self, index: u64) -> Vec<Hash> {
        (0..self.depth as u8)
            .map(|level| self.node(level, (index >> level) ^ 1))
            .collect()
    }

    /// Check a sibling path against a root. The direction at each level
    /// comes from the corresponding bit of `index`.
    pub fn verify(root: &Hash, index: u64, leaf_hash: &Hash, siblings: &[Hash]) -> bool {
        let mut current = *leaf_hash;
        for (level, sibling) in siblings.iter().enumerate() {
            current = if (index >> level) & 1 == 1 {
                hash_pair(sibling, &current)
            } else {
                hash_pair(&current, sibling)
            };
        }
        current == *root
    }

    // ------------------------------------------------------------------
    // Journal
    // ------------------------------------------------------------------

    /// Start recording prior node values. Panics in debug builds if a
    /// journal is already active; nesting is not supported.
    pub fn begin(&mut self) {
        debug_assert!(self.journal.is_none());
        self.journal = Some(HashMap::new());
    }

    /// Keep all journaled mutations and stop recording.
    pub fn commit(&mut self) {
        self.journal = None;
    }

    /// Undo every mutation since `begin`.
    pub fn rollback(&mut self) {
        if let Some(journal) = self.journal.take() {
            for ((level, index), prior) in journal {
                match prior {
                    Some(hash) => {
                        self.nodes.insert((level, index), hash);
                    }
                    None => {
                        self.nodes.remove(&(level, index));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> Hash {
        [byte; 32]
    }

    #[test]
    fn test_empty_root_matches_defaults() {
        let tree = Smt::new(8);
        assert_eq!(tree.root(), Smt::empty_root(8));
    }

    #[test]
    fn test_set_leaf_changes_root() {
        let mut tree = Smt::new(8);
        let empty = tree.root();
        tree.set_leaf(3, leaf(7));
        assert_ne!(tree.root(), empty);

        // Writing the default leaf hash back restores the empty root.
        let default_leaf = default_hashes(8)[0];
        tree.set_leaf(3, default_leaf);
        assert_eq!(tree.root(), empty);
        assert!(tree.nodes.is_empty());
    }

    #[test]
    fn test_proof_verifies_and_binds_index() {
        let mut tree = Smt::new(8);
        tree.set_leaf(5, leaf(1));
        tree.set_leaf(200, leaf(2));

        let root = tree.root();
        let proof = tree.prove(5);
        assert_eq!(proof.len(), 8);
        assert!(Smt::verify(&root, 5, &leaf(1), &proof));
        assert!(!Smt::verify(&root, 4, &leaf(1), &proof));
        assert!(!Smt::verify(&root, 5, &leaf(3), &proof));
    }

    #[test]
    fn test_proof_of_absence() {
        let mut tree = Smt::new(8);
        tree.set_leaf(0, leaf(9));

        let empty_leaf = default_hashes(8)[0];
        let proof = tree.prove(77);
        assert!(Smt::verify(&tree.root(), 77, &empty_leaf, &proof));
    }

    #[test]
    fn test_order_independence() {
        let mut a = Smt::new(8);
        a.set_leaf(1, leaf(1));
        a.set_leaf(2, leaf(2));

        let mut b = Smt::new(8);
        b.set_leaf(2, leaf(2));
        b.set_leaf(1, leaf(1));

        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn test_rollback_restores_root() {
        let mut tree = Smt::new(8);
        tree.set_leaf(1, leaf(1));
        let committed = tree.root();

        tree.begin();
        tree.set_leaf(1, leaf(5));
        tree.set_leaf(9, leaf(6));
        assert_ne!(tree.root(), committed);
        tree.rollback();
        assert_eq!(tree.root(), committed);

        // A committed journal keeps the writes.
        tree.begin();
        tree.set_leaf(9, leaf(6));
        let updated = tree.root();
        tree.commit();
        assert_eq!(tree.root(), updated);
    }
}
