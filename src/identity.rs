//! Long-lived member identity.
//!
//! An identity is a (trapdoor, nullifier secret) pair derived deterministically
//! from user-held secret material, typically a wallet signature over
//! [`IDENTITY_MESSAGE`]. Only the commitment ever leaves the client.

use crate::error::{IdentityError, IdentityResult};
use crate::utils::{
    derive_field, field_to_bytes, field_to_hex, poseidon_hash, validate_and_strip_hex,
};
use log::debug;
use pasta_curves::pallas;
use sha3::{Digest, Sha3_256};
use std::fmt;

/// Message a wallet signs to produce identity secret material.
pub const IDENTITY_MESSAGE: &str = "Sign this message to create your identity!";

/// Length of an ECDSA signature with recovery id, in bytes.
pub const SIGNATURE_BYTES: usize = 65;

const TRAPDOOR_DOMAIN: &[u8] = b"identity_trapdoor";
const NULLIFIER_DOMAIN: &[u8] = b"identity_nullifier";

/// Public commitment to an identity: `Poseidon(trapdoor, nullifier_secret)`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Commitment(pub pallas::Base);

impl Commitment {
    #[must_use]
    pub fn to_field(self) -> pallas::Base {
        self.0
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; 32] {
        field_to_bytes(self.0)
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", field_to_hex(self.0))
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", field_to_hex(self.0))
    }
}

/// A member's secret identity.
///
/// `Debug` never prints the secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    trapdoor: pallas::Base,
    nullifier_secret: pallas::Base,
    commitment: Commitment,
}

impl Identity {
    /// Derives an identity from raw secret material.
    ///
    /// Same input always yields the same identity.
    ///
    /// # Errors
    /// Returns [`IdentityError::InvalidSecret`] if `secret` is empty.
    pub fn derive(secret: &[u8]) -> IdentityResult<Self> {
        if secret.is_empty() {
            return Err(IdentityError::InvalidSecret(
                "secret material cannot be empty".to_string(),
            ));
        }

        let seed = Sha3_256::digest(secret);
        let trapdoor = derive_field(&seed, TRAPDOOR_DOMAIN);
        let nullifier_secret = derive_field(&seed, NULLIFIER_DOMAIN);
        let identity = Self::from_secrets(trapdoor, nullifier_secret);
        debug!("Derived identity with commitment {}", identity.commitment);
        Ok(identity)
    }

    /// Derives an identity from a hex-encoded wallet signature over
    /// [`IDENTITY_MESSAGE`].
    ///
    /// # Errors
    /// Returns [`IdentityError::InvalidSecret`] if the input is not a hex
    /// encoding of exactly [`SIGNATURE_BYTES`] bytes.
    pub fn from_signature(signature_hex: &str) -> IdentityResult<Self> {
        let stripped = validate_and_strip_hex(signature_hex, SIGNATURE_BYTES * 2)
            .map_err(|e| IdentityError::InvalidSecret(e.to_string()))?;
        let bytes =
            hex::decode(stripped).map_err(|e| IdentityError::InvalidSecret(e.to_string()))?;
        Self::derive(&bytes)
    }

    /// Rebuilds an identity from previously exported secrets.
    #[must_use]
    pub fn from_secrets(trapdoor: pallas::Base, nullifier_secret: pallas::Base) -> Self {
        Self {
            trapdoor,
            nullifier_secret,
            commitment: Commitment(poseidon_hash(trapdoor, nullifier_secret)),
        }
    }

    #[must_use]
    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    #[must_use]
    pub fn trapdoor(&self) -> pallas::Base {
        self.trapdoor
    }

    #[must_use]
    pub fn nullifier_secret(&self) -> pallas::Base {
        self.nullifier_secret
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("commitment", &self.commitment)
            .finish_non_exhaustive()
    }
}
