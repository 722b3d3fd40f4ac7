//! Anonymous group greetings with zero-knowledge set membership.
//!
//! A member derives an [`Identity`] from a secret and publishes its
//! [`Commitment`]. Commitments are appended to a fixed-depth Poseidon
//! [`MembershipTree`]. To greet, the member proves in zero knowledge that
//! they own some leaf of the tree and binds the greeting to the proof. The
//! proof carries a per-scope [`NullifierHash`] that the [`Verifier`] records,
//! so each member greets at most once per scope without revealing which
//! member they are.
//!
//! # Components
//!
//! - [`identity`]: secret identities and their public commitments
//! - [`ethereum`]: identities derived from a wallet signature
//! - [`merkle`]: append-only membership tree and membership proofs
//! - [`proof`]: the proof generator and the [`ProofSystem`] seam
//! - [`circuit`]: the Halo2 circuit and [`Halo2Backend`]
//! - [`verifier`]: the verification state machine
//! - [`registry`], [`ledger`], [`group`]: shared state the verifier settles against
//! - [`types`]: JSON wire formats
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zkp_anon_greeter::{
//!     Halo2Backend, Identity, InMemoryRegistry, MembershipTree, ProofGenerator, Verifier,
//! };
//!
//! let alice = Identity::derive(b"alice's secret").unwrap();
//! let mut tree = MembershipTree::new(4).unwrap();
//! let index = tree.insert(alice.commitment()).unwrap();
//!
//! let backend = Arc::new(Halo2Backend::setup(4).unwrap());
//! let generator = ProofGenerator::new(backend.clone(), "greet-v1");
//! let membership = tree.prove_membership(index).unwrap();
//! let (proof, signals) = generator.generate(&alice, &membership, b"hello").unwrap();
//!
//! let verifier = Verifier::new(backend, Arc::new(InMemoryRegistry::new()), "greet-v1");
//! let verdict = verifier.verify(&proof, &signals, b"hello", tree.root()).unwrap();
//! assert!(verdict.is_accepted());
//! ```

pub mod circuit;
pub mod config;
pub mod error;
pub mod ethereum;
pub mod group;
pub mod identity;
pub mod ledger;
pub mod merkle;
pub mod proof;
pub mod registry;
pub mod types;
pub mod utils;
pub mod verifier;


pub use circuit::{Halo2Backend, SetMembershipCircuit};
pub use error::{IdentityError, ProofError, RegistryError, TreeError};
pub use group::{Group, RootHistory};
pub use identity::{Commitment, Identity};
pub use ledger::{InProcessLedger, Ledger};
pub use merkle::{MembershipProof, MembershipTree};
pub use proof::{NullifierHash, ProofGenerator, ProofSystem, PublicSignals, ZkProof};
pub use registry::{FileRegistry, InMemoryRegistry, NullifierRegistry};
pub use types::{CommitmentList, Submission};
pub use verifier::{Rejection, Verdict, Verifier};

/// Circuit parameter for the Halo2 proving system.
///
/// `k = 12` gives 2^12 rows, enough for the Poseidon hashes of a depth-32
/// path. Prover and verifier must agree on it; changing it changes the keys.
pub const CIRCUIT_K: u32 = 12;
