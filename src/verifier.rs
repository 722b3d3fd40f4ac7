//! Server-side verifier state machine.
//!
//! A submission moves `Received -> RootChecked -> ProofChecked ->
//! NullifierChecked -> Accepted`, dropping to `Rejected` at the first failed
//! check. The nullifier is only looked at once the proof has verified, and
//! the look-up and the insert are one atomic registry call.

use crate::error::RegistryResult;
use crate::group::RootHistory;
use crate::ledger::Ledger;
use crate::proof::{
    external_nullifier, signal_hash, NullifierHash, ProofSystem, PublicSignals, Statement, ZkProof,
};
use crate::registry::{AcceptanceRecord, NullifierRegistry};
use crate::utils::field_to_hex;
use log::{debug, info, warn};
use pasta_curves::pallas;
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStage {
    Received,
    RootChecked,
    ProofChecked,
    NullifierChecked,
    Accepted,
    Rejected,
}

impl fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::RootChecked => "root-checked",
            Self::ProofChecked => "proof-checked",
            Self::NullifierChecked => "nullifier-checked",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Why a submission was turned away. Each reason asks something different
/// of the caller, so they are never merged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("Proof was made against a stale or unknown group root; refresh the group and prove again")]
    StaleOrUnknownRoot,

    #[error("Proof is invalid for this message and group")]
    InvalidProof,

    #[error("This identity has already greeted in this scope")]
    NullifierAlreadySpent,
}

impl Rejection {
    /// Stage at which this rejection is decided.
    #[must_use]
    pub fn stage(self) -> VerificationStage {
        match self {
            Self::StaleOrUnknownRoot => VerificationStage::RootChecked,
            Self::InvalidProof => VerificationStage::ProofChecked,
            Self::NullifierAlreadySpent => VerificationStage::NullifierChecked,
        }
    }
}

/// The accepted-message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub root: pallas::Base,
    pub nullifier_hash: NullifierHash,
    pub signal: Vec<u8>,
}

impl Acceptance {
    #[must_use]
    pub fn signal_text(&self) -> String {
        String::from_utf8_lossy(&self.signal).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(Acceptance),
    Rejected(Rejection),
}

impl Verdict {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    #[must_use]
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(reason) => Some(*reason),
        }
    }
}

/// Verifier for one group scope, shared by any number of worker threads.
pub struct Verifier<P: ProofSystem, R: NullifierRegistry> {
    backend: Arc<P>,
    registry: Arc<R>,
    scope: String,
    external_nullifier: pallas::Base,
    listeners: Mutex<Vec<Sender<Acceptance>>>,
}

impl<P: ProofSystem, R: NullifierRegistry> Verifier<P, R> {
    pub fn new(backend: Arc<P>, registry: Arc<R>, scope: &str) -> Self {
        Self {
            backend,
            registry,
            scope: scope.to_string(),
            external_nullifier: external_nullifier(scope),
            listeners: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// Every accepted submission is also sent to `listener`. Listeners whose
    /// receiver has been dropped are forgotten.
    pub fn subscribe(&self, listener: Sender<Acceptance>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Verifies a submission whose proof must be against exactly
    /// `expected_root`, recording its nullifier in the local registry.
    ///
    /// `signal` is the message carried in the clear; it must hash to
    /// `signals.signal_hash`.
    ///
    /// # Errors
    /// Only registry failures are errors. A failed check is an
    /// `Ok(Verdict::Rejected(_))`.
    pub fn verify(
        &self,
        proof: &ZkProof,
        signals: &PublicSignals,
        signal: &[u8],
        expected_root: pallas::Base,
    ) -> RegistryResult<Verdict> {
        self.run(
            proof,
            signals,
            signal,
            |root| *root == expected_root,
            |nullifier, signal| self.registry.try_record(nullifier, AcceptanceRecord::new(signal)),
        )
    }

    /// Like [`Self::verify`], but accepts any root in `history`.
    ///
    /// # Errors
    /// Only registry failures are errors.
    pub fn verify_with_history(
        &self,
        proof: &ZkProof,
        signals: &PublicSignals,
        signal: &[u8],
        history: &RootHistory,
    ) -> RegistryResult<Verdict> {
        self.run(
            proof,
            signals,
            signal,
            |root| history.contains(root),
            |nullifier, signal| self.registry.try_record(nullifier, AcceptanceRecord::new(signal)),
        )
    }

    /// Verifies against an external ledger, which then owns both the root
    /// check and the spent set. The local registry is not consulted.
    ///
    /// # Errors
    /// Only ledger write failures are errors.
    pub fn verify_on_ledger(
        &self,
        proof: &ZkProof,
        signals: &PublicSignals,
        signal: &[u8],
        ledger: &dyn Ledger,
    ) -> RegistryResult<Verdict> {
        self.run(
            proof,
            signals,
            signal,
            |root| ledger.is_known_root(root),
            |nullifier, signal| ledger.record_acceptance(nullifier, signal),
        )
    }

    fn run(
        &self,
        proof: &ZkProof,
        signals: &PublicSignals,
        signal: &[u8],
        root_accepted: impl FnOnce(&pallas::Base) -> bool,
        record: impl FnOnce(NullifierHash, &[u8]) -> RegistryResult<bool>,
    ) -> RegistryResult<Verdict> {
        let nullifier = signals.nullifier_hash;
        debug!(
            "[{}] submission {} for root {}",
            VerificationStage::Received,
            nullifier,
            field_to_hex(signals.root)
        );

        if !root_accepted(&signals.root) {
            return Ok(self.reject(nullifier, Rejection::StaleOrUnknownRoot));
        }
        debug!("[{}] {}", VerificationStage::RootChecked, nullifier);

        let statement = Statement::new(signals, self.external_nullifier);
        if signal_hash(signal) != signals.signal_hash || !self.backend.verify(proof, &statement) {
            return Ok(self.reject(nullifier, Rejection::InvalidProof));
        }
        debug!("[{}] {}", VerificationStage::ProofChecked, nullifier);

        if !record(nullifier, signal)? {
            return Ok(self.reject(nullifier, Rejection::NullifierAlreadySpent));
        }
        debug!("[{}] {}", VerificationStage::NullifierChecked, nullifier);

        let acceptance = Acceptance {
            root: signals.root,
            nullifier_hash: nullifier,
            signal: signal.to_vec(),
        };
        info!(
            "[{}] greeting from {} in scope '{}': {}",
            VerificationStage::Accepted,
            nullifier,
            self.scope,
            acceptance.signal_text()
        );
        self.notify(&acceptance);
        Ok(Verdict::Accepted(acceptance))
    }

    fn reject(&self, nullifier: NullifierHash, reason: Rejection) -> Verdict {
        warn!(
            "[{}] {} at {}: {}",
            VerificationStage::Rejected,
            nullifier,
            reason.stage(),
            reason
        );
        Verdict::Rejected(reason)
    }

    fn notify(&self, acceptance: &Acceptance) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|listener| listener.send(acceptance.clone()).is_ok());
    }
}
