//! Proof generation: binds an identity, its membership path and a signal
//! into one zero-knowledge proof plus the public signals a verifier checks.
//!
//! The proving system is an opaque capability behind [`ProofSystem`]; the
//! production implementation is [`crate::circuit::Halo2Backend`].

use crate::error::{ProofError, ProofResult};
use crate::identity::Identity;
use crate::merkle::MembershipProof;
use crate::utils::{field_from_hex, field_to_bytes, field_to_hex, hash_to_field, poseidon_hash};
use log::{debug, info};
use pasta_curves::pallas;
use std::fmt;
use std::sync::Arc;

/// Public, unlinkable per-scope tag of an identity:
/// `Poseidon(nullifier_secret, external_nullifier)`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NullifierHash(pub pallas::Base);

impl NullifierHash {
    #[must_use]
    pub fn to_bytes(self) -> [u8; 32] {
        field_to_bytes(self.0)
    }

    #[must_use]
    pub fn to_hex(self) -> String {
        field_to_hex(self.0)
    }

    /// # Errors
    /// Returns an error if `input` is not a canonical field encoding.
    pub fn from_hex(input: &str) -> anyhow::Result<Self> {
        field_from_hex(input).map(Self)
    }
}

impl fmt::Debug for NullifierHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NullifierHash({})", self.to_hex())
    }
}

impl fmt::Display for NullifierHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Field element identifying a group/action scope, e.g. `"greet-v1"`.
#[must_use]
pub fn external_nullifier(scope: &str) -> pallas::Base {
    hash_to_field(scope.as_bytes())
}

/// Field element the proof binds the message to.
#[must_use]
pub fn signal_hash(signal: &[u8]) -> pallas::Base {
    hash_to_field(signal)
}

#[must_use]
pub fn nullifier_hash(identity: &Identity, external_nullifier: pallas::Base) -> NullifierHash {
    NullifierHash(poseidon_hash(identity.nullifier_secret(), external_nullifier))
}

/// Opaque proof bytes produced by a [`ProofSystem`].
#[derive(Clone, PartialEq, Eq)]
pub struct ZkProof(pub Vec<u8>);

impl ZkProof {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ZkProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZkProof({} bytes)", self.0.len())
    }
}

/// Values that travel with a proof and are checked in the clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicSignals {
    pub root: pallas::Base,
    pub nullifier_hash: NullifierHash,
    pub signal_hash: pallas::Base,
}

impl PublicSignals {
    /// Public signals for a submission carrying `signal` in the clear.
    #[must_use]
    pub fn for_signal(root: pallas::Base, nullifier_hash: NullifierHash, signal: &[u8]) -> Self {
        Self {
            root,
            nullifier_hash,
            signal_hash: signal_hash(signal),
        }
    }
}

/// Full public statement a backend proves: the public signals plus the
/// scope the verifier is operating in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statement {
    pub root: pallas::Base,
    pub nullifier_hash: pallas::Base,
    pub signal_hash: pallas::Base,
    pub external_nullifier: pallas::Base,
}

impl Statement {
    #[must_use]
    pub fn new(signals: &PublicSignals, external_nullifier: pallas::Base) -> Self {
        Self {
            root: signals.root,
            nullifier_hash: signals.nullifier_hash.0,
            signal_hash: signals.signal_hash,
            external_nullifier,
        }
    }

    /// Instance column layout shared by prover and verifier.
    #[must_use]
    pub fn to_instance(&self) -> Vec<pallas::Base> {
        vec![
            self.root,
            self.nullifier_hash,
            self.signal_hash,
            self.external_nullifier,
        ]
    }
}

/// Private inputs of the membership statement.
#[derive(Clone)]
pub struct Witness {
    pub trapdoor: pallas::Base,
    pub nullifier_secret: pallas::Base,
    pub siblings: Vec<pallas::Base>,
    pub path_directions: Vec<bool>,
}

impl Witness {
    #[must_use]
    pub fn new(identity: &Identity, membership: &MembershipProof) -> Self {
        Self {
            trapdoor: identity.trapdoor(),
            nullifier_secret: identity.nullifier_secret(),
            siblings: membership.siblings.clone(),
            path_directions: membership.path_directions.clone(),
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}

impl fmt::Debug for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Witness")
            .field("depth", &self.depth())
            .finish_non_exhaustive()
    }
}

/// A zero-knowledge proving system for the membership statement.
///
/// Implementations are bound to one tree depth, since the circuit shape
/// (and hence the keys) depend on it.
pub trait ProofSystem: Send + Sync {
    fn depth(&self) -> usize;

    /// # Errors
    /// Returns [`ProofError::Backend`] if the system fails to produce a proof.
    fn prove(&self, witness: &Witness, statement: &Statement) -> ProofResult<ZkProof>;

    /// Returns `true` only for a proof of exactly `statement`.
    fn verify(&self, proof: &ZkProof, statement: &Statement) -> bool;
}

/// Client-side proof generator for one group scope.
///
/// Holds no mutable state; clones can run in parallel.
pub struct ProofGenerator<P: ProofSystem> {
    backend: Arc<P>,
    scope: String,
    external_nullifier: pallas::Base,
}

impl<P: ProofSystem> Clone for ProofGenerator<P> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            scope: self.scope.clone(),
            external_nullifier: self.external_nullifier,
        }
    }
}

impl<P: ProofSystem> ProofGenerator<P> {
    pub fn new(backend: Arc<P>, scope: &str) -> Self {
        Self {
            backend,
            scope: scope.to_string(),
            external_nullifier: external_nullifier(scope),
        }
    }

    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    #[must_use]
    pub fn external_nullifier(&self) -> pallas::Base {
        self.external_nullifier
    }

    /// Produces a proof that the holder of `identity` is the member at
    /// `membership.leaf_index`, bound to `signal`.
    ///
    /// # Errors
    /// - [`ProofError::ProofGeneration`] if the membership proof does not
    ///   belong to `identity`, does not recompute to its root, or has a depth
    ///   the backend was not set up for
    /// - [`ProofError::Backend`] if the proving system fails
    pub fn generate(
        &self,
        identity: &Identity,
        membership: &MembershipProof,
        signal: &[u8],
    ) -> ProofResult<(ZkProof, PublicSignals)> {
        if membership.leaf != identity.commitment().to_field() {
            return Err(ProofError::ProofGeneration(format!(
                "membership proof leaf {} does not match identity commitment {}",
                field_to_hex(membership.leaf),
                identity.commitment()
            )));
        }
        if !membership.verify() {
            return Err(ProofError::ProofGeneration(
                "membership path does not recompute to its root".to_string(),
            ));
        }
        if membership.depth() != self.backend.depth() {
            return Err(ProofError::ProofGeneration(format!(
                "membership proof depth {} does not match proving system depth {}",
                membership.depth(),
                self.backend.depth()
            )));
        }

        let signals = PublicSignals::for_signal(
            membership.root,
            nullifier_hash(identity, self.external_nullifier),
            signal,
        );
        let statement = Statement::new(&signals, self.external_nullifier);
        debug!(
            "Generating proof for scope '{}' at root {}",
            self.scope,
            field_to_hex(signals.root)
        );

        let proof = self
            .backend
            .prove(&Witness::new(identity, membership), &statement)?;
        info!(
            "Generated {}-byte proof with nullifier hash {}",
            proof.len(),
            signals.nullifier_hash
        );
        Ok((proof, signals))
    }
}
