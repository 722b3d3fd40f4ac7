//! Typed errors returned by the protocol core.
//!
//! File, config and CLI boundaries keep using `anyhow`; everything a caller
//! has to branch on is an enum here.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Invalid identity secret: {0}")]
    InvalidSecret(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Membership tree is full: capacity {capacity} leaves")]
    TreeFull { capacity: u64 },

    #[error("Leaf index {index} is out of range (tree holds {size} leaves)")]
    IndexOutOfRange { index: u64, size: u64 },

    #[error("Unsupported tree depth {depth}: must be between 1 and {max}")]
    InvalidDepth { depth: usize, max: usize },

    #[error("Commitment {0} is already registered")]
    DuplicateCommitment(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    /// The witness does not hang together (wrong identity, wrong path, wrong depth).
    #[error("Proof generation failed: {0}")]
    ProofGeneration(String),

    /// The proving system itself failed (keygen, synthesis, transcript).
    #[error("Proving backend error: {0}")]
    Backend(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;
pub type TreeResult<T> = Result<T, TreeError>;
pub type ProofResult<T> = Result<T, ProofError>;

/// Failures of the spent-nullifier store. These are not verdicts: a
/// submission that hits one is neither accepted nor rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Nullifier registry I/O error: {0}")]
    Io(String),

    #[error("Nullifier registry is corrupted at line {line}: {reason}")]
    Corrupted { line: usize, reason: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;
