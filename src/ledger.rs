//! The shared ledger a verifier settles submissions against: the group's
//! accepted roots plus the spent-nullifier set.

use crate::error::RegistryResult;
use crate::group::Group;
use crate::proof::NullifierHash;
use crate::registry::{AcceptanceRecord, NullifierRegistry};
use pasta_curves::pallas;
use std::sync::Arc;

pub trait Ledger: Send + Sync {
    fn current_root(&self) -> pallas::Base;

    /// Whether proofs against `root` are still accepted.
    fn is_known_root(&self, root: &pallas::Base) -> bool {
        *root == self.current_root()
    }

    fn is_spent(&self, nullifier: &NullifierHash) -> bool;

    /// Atomically marks `nullifier` spent. `Ok(false)` means it already was.
    ///
    /// # Errors
    /// Returns a registry error if the spent set cannot be updated.
    fn record_acceptance(&self, nullifier: NullifierHash, signal: &[u8]) -> RegistryResult<bool>;
}

/// Ledger backed by a [`Group`] living in this process and any registry.
pub struct InProcessLedger<R: NullifierRegistry> {
    group: Arc<Group>,
    registry: Arc<R>,
}

impl<R: NullifierRegistry> InProcessLedger<R> {
    pub fn new(group: Arc<Group>, registry: Arc<R>) -> Self {
        Self { group, registry }
    }

    #[must_use]
    pub fn group(&self) -> &Arc<Group> {
        &self.group
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }
}

impl<R: NullifierRegistry> Ledger for InProcessLedger<R> {
    fn current_root(&self) -> pallas::Base {
        self.group.root()
    }

    fn is_known_root(&self, root: &pallas::Base) -> bool {
        self.group.is_known_root(root)
    }

    fn is_spent(&self, nullifier: &NullifierHash) -> bool {
        self.registry.is_spent(nullifier)
    }

    fn record_acceptance(&self, nullifier: NullifierHash, signal: &[u8]) -> RegistryResult<bool> {
        self.registry
            .try_record(nullifier, AcceptanceRecord::new(signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Commitment;
    use crate::registry::InMemoryRegistry;

    #[test]
    fn test_in_process_ledger_tracks_group_and_registry() {
        let group = Arc::new(Group::new(3, 2).unwrap());
        let ledger = InProcessLedger::new(group.clone(), Arc::new(InMemoryRegistry::new()));

        let before = ledger.current_root();
        group.register(Commitment(pallas::Base::from(9u64))).unwrap();
        assert_ne!(ledger.current_root(), before);
        assert!(ledger.is_known_root(&before));

        let nullifier = NullifierHash(pallas::Base::from(5u64));
        assert!(!ledger.is_spent(&nullifier));
        assert!(ledger.record_acceptance(nullifier, b"hi").unwrap());
        assert!(ledger.is_spent(&nullifier));
        assert!(!ledger.record_acceptance(nullifier, b"hi").unwrap());
    }
}
