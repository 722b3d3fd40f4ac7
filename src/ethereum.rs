//! Wallet-backed identities.
//!
//! An Ethereum wallet signs [`IDENTITY_MESSAGE`]; the signature becomes the
//! identity secret. The same key therefore always yields the same identity,
//! and the key never leaves the wallet.

use crate::identity::{Identity, IDENTITY_MESSAGE};
use crate::utils::validate_and_strip_hex;
use anyhow::{Context, Result};
use ethers::signers::LocalWallet;
use ethers::utils::hash_message;

/// Expected length of an Ethereum private key in hex characters (excluding 0x prefix)
pub const PRIVATE_KEY_HEX_LENGTH: usize = 64;

/// Validates an Ethereum private key.
///
/// # Errors
///
/// Returns an error if:
/// - The private key is not exactly 64 hex characters (excluding 0x prefix)
/// - The private key contains non-hex characters
/// - The private key is all zeros
///
/// # Examples
///
/// ```
/// use zkp_anon_greeter::ethereum::validate_private_key;
///
/// assert!(validate_private_key("0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318").is_ok());
/// assert!(validate_private_key("0x0000000000000000000000000000000000000000000000000000000000000000").is_err());
/// ```
pub fn validate_private_key(private_key: &str) -> Result<String> {
    let stripped = validate_and_strip_hex(private_key, PRIVATE_KEY_HEX_LENGTH)?;

    if stripped.chars().all(|c| c == '0') {
        return Err(anyhow::anyhow!(
            "Private key cannot be all zeros. Please provide a valid private key."
        ));
    }

    Ok(stripped)
}

/// # Errors
/// Returns an error if the key is malformed or not a valid secp256k1 scalar.
pub fn parse_wallet(private_key: &str) -> Result<LocalWallet> {
    let stripped = validate_private_key(private_key)?;
    stripped
        .parse::<LocalWallet>()
        .context("Failed to parse private key")
}

/// EIP-191 signature of [`IDENTITY_MESSAGE`], as 130 hex characters.
///
/// # Errors
/// Returns an error if signing fails.
pub fn sign_identity_message(wallet: &LocalWallet) -> Result<String> {
    let signature = wallet
        .sign_hash(hash_message(IDENTITY_MESSAGE))
        .context("Failed to sign identity message")?;
    Ok(hex::encode(signature.to_vec()))
}

/// # Errors
/// Returns an error if signing fails.
pub fn identity_from_wallet(wallet: &LocalWallet) -> Result<Identity> {
    let signature = sign_identity_message(wallet)?;
    Identity::from_signature(&signature).context("Failed to derive identity from signature")
}

/// # Errors
/// See [`parse_wallet`] and [`identity_from_wallet`].
pub fn identity_from_private_key(private_key: &str) -> Result<Identity> {
    identity_from_wallet(&parse_wallet(private_key)?)
}
