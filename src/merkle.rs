//! Fixed-depth, append-only Merkle tree over identity commitments.
//!
//! Unfilled leaves hold the canonical zero value. Every insertion rehashes only
//! the path from the new leaf to the root, so the cached root is always
//! current and costs O(depth) to maintain.

use crate::error::{TreeError, TreeResult};
use crate::identity::Commitment;
use crate::utils::{field_to_hex, poseidon_hash};
use log::debug;
use pasta_curves::pallas;
use std::collections::HashMap;
use std::fmt;

/// Depth used by the original greeting group (2^20 members).
pub const DEFAULT_TREE_DEPTH: usize = 20;

/// Deepest tree the indices and the circuit support.
pub const MAX_TREE_DEPTH: usize = 32;

/// A Merkle proof for leaf inclusion.
///
/// `path_directions[i]` is `true` when the node at level `i` on the path is a
/// right child, i.e. `siblings[i]` sits on its left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipProof {
    pub leaf: pallas::Base,
    pub leaf_index: u64,
    pub siblings: Vec<pallas::Base>,
    pub path_directions: Vec<bool>,
    pub root: pallas::Base,
}

impl MembershipProof {
    #[must_use]
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }

    /// Folds the leaf up through the siblings.
    #[must_use]
    pub fn compute_root(&self) -> pallas::Base {
        self.siblings
            .iter()
            .zip(&self.path_directions)
            .fold(self.leaf, |current, (sibling, &is_right)| {
                if is_right {
                    poseidon_hash(*sibling, current)
                } else {
                    poseidon_hash(current, *sibling)
                }
            })
    }

    /// Checks that the path is well formed, agrees with `leaf_index`, and
    /// recomputes to `root`.
    #[must_use]
    pub fn verify(&self) -> bool {
        if self.siblings.len() != self.path_directions.len() {
            return false;
        }
        let index_matches = self
            .path_directions
            .iter()
            .enumerate()
            .all(|(level, &is_right)| ((self.leaf_index >> level) & 1 == 1) == is_right);
        let in_range = self.depth() >= 64 || self.leaf_index >> self.depth() == 0;

        index_matches && in_range && self.compute_root() == self.root
    }
}

impl fmt::Display for MembershipProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MembershipProof:\n  Leaf: {}\n  Root: {}\n  Index: {}\n  Depth: {}",
            field_to_hex(self.leaf),
            field_to_hex(self.root),
            self.leaf_index,
            self.depth()
        )
    }
}

/// An append-only binary Merkle tree of fixed depth.
///
/// `nodes[level]` holds the filled prefix of that level; anything past it is
/// `zeros[level]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipTree {
    depth: usize,
    zeros: Vec<pallas::Base>,
    nodes: Vec<Vec<pallas::Base>>,
    root: pallas::Base,
    index_by_commitment: HashMap<[u8; 32], u64>,
}

impl MembershipTree {
    /// Creates an empty tree with `2^depth` zero leaves.
    ///
    /// # Errors
    /// Returns [`TreeError::InvalidDepth`] unless `1 <= depth <= MAX_TREE_DEPTH`.
    pub fn new(depth: usize) -> TreeResult<Self> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(TreeError::InvalidDepth {
                depth,
                max: MAX_TREE_DEPTH,
            });
        }

        let mut zeros = Vec::with_capacity(depth + 1);
        zeros.push(pallas::Base::zero());
        for level in 0..depth {
            let below = zeros[level];
            zeros.push(poseidon_hash(below, below));
        }

        Ok(Self {
            depth,
            root: zeros[depth],
            zeros,
            nodes: vec![Vec::new(); depth + 1],
            index_by_commitment: HashMap::new(),
        })
    }

    /// Builds a tree by inserting `commitments` in order.
    ///
    /// # Errors
    /// Fails like [`MembershipTree::new`] and [`MembershipTree::insert`].
    pub fn from_commitments(depth: usize, commitments: &[Commitment]) -> TreeResult<Self> {
        let mut tree = Self::new(depth)?;
        for commitment in commitments {
            tree.insert(*commitment)?;
        }
        Ok(tree)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.nodes[0].len() as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes[0].is_empty()
    }

    /// Cached root; never recomputed on read.
    #[must_use]
    pub fn root(&self) -> pallas::Base {
        self.root
    }

    /// Leaves in insertion order.
    pub fn leaves(&self) -> impl Iterator<Item = Commitment> + '_ {
        self.nodes[0].iter().copied().map(Commitment)
    }

    #[must_use]
    pub fn index_of(&self, commitment: &Commitment) -> Option<u64> {
        self.index_by_commitment.get(&commitment.to_bytes()).copied()
    }

    fn node(&self, level: usize, index: u64) -> pallas::Base {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.nodes[level].get(i).copied())
            .unwrap_or(self.zeros[level])
    }

    /// Appends `commitment` at the next free index and returns that index.
    ///
    /// # Errors
    /// - [`TreeError::TreeFull`] when all `2^depth` leaves are taken
    /// - [`TreeError::DuplicateCommitment`] when the commitment is already a leaf
    pub fn insert(&mut self, commitment: Commitment) -> TreeResult<u64> {
        let leaf_index = self.len();
        if leaf_index >= self.capacity() {
            return Err(TreeError::TreeFull {
                capacity: self.capacity(),
            });
        }
        let key = commitment.to_bytes();
        if self.index_by_commitment.contains_key(&key) {
            return Err(TreeError::DuplicateCommitment(commitment.to_string()));
        }

        self.nodes[0].push(commitment.to_field());
        let mut index = leaf_index;
        let mut current = commitment.to_field();
        for level in 0..self.depth {
            current = if index & 1 == 1 {
                poseidon_hash(self.node(level, index - 1), current)
            } else {
                poseidon_hash(current, self.node(level, index + 1))
            };
            index >>= 1;

            let parents = &mut self.nodes[level + 1];
            match usize::try_from(index) {
                Ok(i) if i < parents.len() => parents[i] = current,
                _ => parents.push(current),
            }
        }

        self.root = current;
        self.index_by_commitment.insert(key, leaf_index);
        debug!(
            "Inserted commitment {} at leaf {}, new root {}",
            commitment,
            leaf_index,
            field_to_hex(self.root)
        );
        Ok(leaf_index)
    }

    /// Extracts the sibling path for an assigned leaf.
    ///
    /// # Errors
    /// Returns [`TreeError::IndexOutOfRange`] if no commitment has been
    /// inserted at `leaf_index`.
    pub fn prove_membership(&self, leaf_index: u64) -> TreeResult<MembershipProof> {
        if leaf_index >= self.len() {
            return Err(TreeError::IndexOutOfRange {
                index: leaf_index,
                size: self.len(),
            });
        }

        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_directions = Vec::with_capacity(self.depth);
        let mut index = leaf_index;
        for level in 0..self.depth {
            let is_right = index & 1 == 1;
            siblings.push(self.node(level, index ^ 1));
            path_directions.push(is_right);
            index >>= 1;
        }

        Ok(MembershipProof {
            leaf: self.node(0, leaf_index),
            leaf_index,
            siblings,
            path_directions,
            root: self.root,
        })
    }

    /// Verify a membership proof against this tree's current root.
    #[must_use]
    pub fn verify_proof(&self, proof: &MembershipProof) -> bool {
        proof.root == self.root && proof.depth() == self.depth && proof.verify()
    }
}
