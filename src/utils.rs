//! Field encoding, hashing and hex helpers shared by every layer.

use anyhow::{Context, Result};
use halo2_gadgets::poseidon::primitives::{
    self as poseidon, ConstantLength, P128Pow5T3 as PoseidonSpec,
};
use pasta_curves::group::ff::{FromUniformBytes, PrimeField};
use pasta_curves::pallas;
use sha3::{Digest, Sha3_256, Sha3_512};

/// Size in bytes of a canonical field element encoding.
pub const FIELD_BYTES: usize = 32;

/// Length of a field element encoding in hex characters.
pub const FIELD_HEX_LENGTH: usize = FIELD_BYTES * 2;

fn is_valid_hex_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_hex_prefix(input: &str) -> &str {
    input
        .trim()
        .strip_prefix("0x")
        .or_else(|| input.trim().strip_prefix("0X"))
        .unwrap_or_else(|| input.trim())
}

/// Validates and strips hex prefix from a string.
///
/// # Errors
/// Returns an error if:
/// - The hex string has incorrect length
/// - The hex string contains non-hex characters
///
/// # Examples
///
/// ```
/// use zkp_anon_greeter::utils::validate_and_strip_hex;
///
/// let result = validate_and_strip_hex("0x1234abcd", 8).unwrap();
/// assert_eq!(result, "1234abcd");
/// ```
pub fn validate_and_strip_hex(input: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_hex_prefix(input);

    if stripped.len() != expected_len {
        return Err(anyhow::anyhow!(
            "Invalid hex string: must be {} characters (got {})",
            expected_len,
            stripped.len()
        ));
    }

    if !is_valid_hex_string(stripped) {
        return Err(anyhow::anyhow!(
            "Invalid hex string: contains non-hex characters"
        ));
    }

    Ok(stripped.to_string())
}

const BASE_U64: u64 = 256;

/// Interprets 32 bytes as a big-endian integer and reduces it into the
/// Pallas base field.
///
/// Used for digests, where the reduction bias is irrelevant. This is not the
/// inverse of [`field_to_bytes`]; use [`field_from_bytes`] for that.
#[inline]
#[must_use]
pub fn bytes_to_field(bytes: &[u8; 32]) -> pallas::Base {
    let mut value = pallas::Base::zero();
    let base = pallas::Base::from(BASE_U64);

    for &byte in bytes.iter() {
        value = value * base + pallas::Base::from(byte as u64);
    }

    value
}

/// Canonical little-endian encoding of a field element.
#[inline]
#[must_use]
pub fn field_to_bytes(field: pallas::Base) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    let repr = field.to_repr();
    bytes.copy_from_slice(repr.as_ref());
    bytes
}

/// Decodes a canonical little-endian encoding. Returns `None` for values
/// outside the field.
#[must_use]
pub fn field_from_bytes(bytes: &[u8; 32]) -> Option<pallas::Base> {
    Option::from(pallas::Base::from_repr(*bytes))
}

/// Hex form of [`field_to_bytes`].
#[must_use]
pub fn field_to_hex(field: pallas::Base) -> String {
    hex::encode(field_to_bytes(field))
}

/// Parses the hex form of a canonical field encoding, with or without `0x`.
///
/// # Errors
/// Returns an error on bad hex, wrong length or a non-canonical encoding.
pub fn field_from_hex(input: &str) -> Result<pallas::Base> {
    let stripped = validate_and_strip_hex(input, FIELD_HEX_LENGTH)?;
    let bytes = hex::decode(&stripped).context("Failed to decode field element hex")?;
    let array: [u8; FIELD_BYTES] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("Field element must be {FIELD_BYTES} bytes"))?;
    field_from_bytes(&array).ok_or_else(|| {
        anyhow::anyhow!("Non-canonical field element encoding: {stripped}")
    })
}

/// Hashes arbitrary bytes into the field: SHA3-256, then big-endian reduction.
#[must_use]
pub fn hash_to_field(data: &[u8]) -> pallas::Base {
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Sha3_256::digest(data));
    bytes_to_field(&digest)
}

/// Derives a uniformly distributed field element from `seed` under a domain
/// tag, using a 64-byte wide reduction.
#[must_use]
pub fn derive_field(seed: &[u8], domain: &[u8]) -> pallas::Base {
    let mut hasher = Sha3_512::new();
    hasher.update(seed);
    hasher.update(domain);
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    pallas::Base::from_uniform_bytes(&wide)
}

/// Poseidon hash of two field elements using `P128Pow5T3` specification.
///
/// This is the same permutation the circuit evaluates with `Pow5Chip`, so
/// every native value computed here can be reproduced in-circuit.
///
/// # Example
///
/// ```
/// use zkp_anon_greeter::utils::poseidon_hash;
/// use pasta_curves::pallas;
///
/// let left = pallas::Base::from(1);
/// let right = pallas::Base::from(2);
/// assert_ne!(poseidon_hash(left, right), poseidon_hash(right, left));
/// ```
#[inline]
#[must_use]
pub fn poseidon_hash(left: pallas::Base, right: pallas::Base) -> pallas::Base {
    let inputs = [left, right];
    poseidon::Hash::<_, PoseidonSpec, ConstantLength<2>, 3, 2>::init().hash(inputs)
}
