//! Process-scoped handle to a group's membership tree.
//!
//! Registration takes the write lock, so leaf indices are handed out strictly
//! in order; everything else reads concurrently.

use crate::error::TreeResult;
use crate::identity::Commitment;
use crate::merkle::{MembershipProof, MembershipTree};
use crate::utils::field_to_hex;
use log::{debug, info};
use pasta_curves::pallas;
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Bounded window of the most recent tree roots, newest last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHistory {
    capacity: usize,
    roots: VecDeque<pallas::Base>,
}

impl RootHistory {
    /// A capacity of 0 is treated as 1: the latest root is always accepted.
    #[must_use]
    pub fn new(capacity: usize, initial: pallas::Base) -> Self {
        let capacity = capacity.max(1);
        let mut roots = VecDeque::with_capacity(capacity);
        roots.push_back(initial);
        Self { capacity, roots }
    }

    pub fn push(&mut self, root: pallas::Base) {
        if self.roots.back() == Some(&root) {
            return;
        }
        if self.roots.len() == self.capacity {
            self.roots.pop_front();
        }
        self.roots.push_back(root);
    }

    #[must_use]
    pub fn contains(&self, root: &pallas::Base) -> bool {
        self.roots.contains(root)
    }

    #[must_use]
    pub fn latest(&self) -> pallas::Base {
        // Never empty: seeded in `new`, and `push` refills after popping.
        self.roots.back().copied().unwrap_or_else(pallas::Base::zero)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

#[derive(Debug)]
struct GroupState {
    tree: MembershipTree,
    history: RootHistory,
}

/// A membership group: the tree plus its recent-root history.
#[derive(Debug)]
pub struct Group {
    state: RwLock<GroupState>,
}

impl Group {
    /// # Errors
    /// Returns a tree error for unsupported depths.
    pub fn new(depth: usize, root_history_size: usize) -> TreeResult<Self> {
        Ok(Self::from_tree(MembershipTree::new(depth)?, root_history_size))
    }

    /// Wraps an existing tree, e.g. one rebuilt from a published commitment
    /// list. The history starts at the tree's current root.
    #[must_use]
    pub fn from_tree(tree: MembershipTree, root_history_size: usize) -> Self {
        let history = RootHistory::new(root_history_size, tree.root());
        Self {
            state: RwLock::new(GroupState { tree, history }),
        }
    }

    /// Rebuilds a group from its commitments in registration order, so the
    /// history holds the roots the last `root_history_size` registrations
    /// produced.
    ///
    /// # Errors
    /// Fails on an unsupported depth, a duplicate or more commitments than the
    /// depth allows.
    pub fn from_commitments(
        depth: usize,
        commitments: &[Commitment],
        root_history_size: usize,
    ) -> TreeResult<Self> {
        let mut tree = MembershipTree::new(depth)?;
        let mut history = RootHistory::new(root_history_size, tree.root());
        for &commitment in commitments {
            tree.insert(commitment)?;
            history.push(tree.root());
        }
        debug!(
            "Rebuilt group of {} members, {} recent roots",
            tree.len(),
            history.len()
        );
        Ok(Self {
            state: RwLock::new(GroupState { tree, history }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, GroupState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GroupState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a commitment and records the new root.
    ///
    /// # Errors
    /// Propagates [`MembershipTree::insert`] failures; the group is unchanged.
    pub fn register(&self, commitment: Commitment) -> TreeResult<u64> {
        let mut state = self.write();
        let index = state.tree.insert(commitment)?;
        let root = state.tree.root();
        state.history.push(root);
        info!(
            "Registered member {} at index {}, root {}",
            commitment,
            index,
            field_to_hex(root)
        );
        Ok(index)
    }

    #[must_use]
    pub fn root(&self) -> pallas::Base {
        self.read().tree.root()
    }

    #[must_use]
    pub fn is_known_root(&self, root: &pallas::Base) -> bool {
        self.read().history.contains(root)
    }

    #[must_use]
    pub fn root_history(&self) -> RootHistory {
        self.read().history.clone()
    }

    /// # Errors
    /// Returns [`crate::error::TreeError::IndexOutOfRange`] for unassigned leaves.
    pub fn prove_membership(&self, leaf_index: u64) -> TreeResult<MembershipProof> {
        self.read().tree.prove_membership(leaf_index)
    }

    #[must_use]
    pub fn index_of(&self, commitment: &Commitment) -> Option<u64> {
        self.read().tree.index_of(commitment)
    }

    /// Consistent copy of the tree for offline proof generation.
    #[must_use]
    pub fn snapshot(&self) -> MembershipTree {
        self.read().tree.clone()
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.read().tree.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.read().tree.depth()
    }
}
