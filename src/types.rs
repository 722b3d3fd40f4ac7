//! Wire formats exchanged with the outside world: the greeting submission a
//! client sends to the verifier, and the published commitment list clients
//! rebuild the membership tree from.

use crate::group::Group;
use crate::identity::Commitment;
use crate::merkle::MembershipTree;
use crate::proof::{NullifierHash, PublicSignals, ZkProof};
use crate::utils::{field_from_hex, field_to_hex, FIELD_HEX_LENGTH};
use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Acceptable submission age, in seconds, relative to the verifier's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampWindow {
    pub tolerance_secs: u64,
    pub max_age_secs: u64,
}

impl Default for TimestampWindow {
    fn default() -> Self {
        Self {
            tolerance_secs: 30,
            max_age_secs: 86400,
        }
    }
}

fn unix_now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| anyhow::anyhow!("System clock unavailable: {}", e))
}

/// A greeting plus the proof that its sender is an unspent group member.
///
/// The signal hash is deliberately absent: the verifier recomputes it from
/// `signal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub signal: String,
    /// Group root the proof was made against (32-byte LE hex).
    pub root: String,
    pub nullifier_hash: String,
    /// Proof bytes as hex.
    pub proof: String,
    /// Unix timestamp when the proof was generated.
    pub timestamp: u64,
}

impl Submission {
    /// # Errors
    /// Fails only if the system clock is before the Unix epoch.
    pub fn new(signal: &str, proof: &ZkProof, signals: &PublicSignals) -> Result<Self> {
        Ok(Self {
            signal: signal.to_string(),
            root: field_to_hex(signals.root),
            nullifier_hash: signals.nullifier_hash.to_hex(),
            proof: hex::encode(proof.as_bytes()),
            timestamp: unix_now()?,
        })
    }

    /// Structural checks done before any cryptography: field presence, hex
    /// encodings and lengths, proof size and the timestamp window.
    ///
    /// # Errors
    /// Returns an error describing the first check that failed.
    pub fn validate(&self, window: TimestampWindow, max_proof_bytes: usize) -> Result<()> {
        debug!("Starting submission validation");
        debug!("Root length: {}", self.root.len());
        debug!("Nullifier hash length: {}", self.nullifier_hash.len());
        debug!("Proof hex length: {}", self.proof.len());
        debug!("Timestamp: {}", self.timestamp);

        if self.root.is_empty() {
            return Err(anyhow::anyhow!(
                "Root cannot be empty. Expected a {}-character hex string.",
                FIELD_HEX_LENGTH
            ));
        }
        if self.nullifier_hash.is_empty() {
            return Err(anyhow::anyhow!(
                "Nullifier hash cannot be empty. Expected a {}-character hex string.",
                FIELD_HEX_LENGTH
            ));
        }
        if self.proof.is_empty() {
            return Err(anyhow::anyhow!(
                "ZK proof cannot be empty. The proof data is missing."
            ));
        }
        if self.proof.len() / 2 > max_proof_bytes {
            return Err(anyhow::anyhow!(
                "ZK proof too large: {} bytes (max: {} bytes)",
                self.proof.len() / 2,
                max_proof_bytes
            ));
        }

        let current_timestamp = unix_now()?;
        debug!("Current timestamp: {}", current_timestamp);

        if self.timestamp > current_timestamp.saturating_add(window.tolerance_secs) {
            return Err(anyhow::anyhow!(
                "Timestamp is too far in the future: {} (current: {}, tolerance: {}s). Please check system clock and proof timestamp.",
                self.timestamp,
                current_timestamp,
                window.tolerance_secs
            ));
        }

        if current_timestamp > self.timestamp.saturating_add(window.max_age_secs) {
            return Err(anyhow::anyhow!(
                "Timestamp is too old: {} (current: {}, max age: {}s). This proof may be expired. Please generate a fresh proof.",
                self.timestamp,
                current_timestamp,
                window.max_age_secs
            ));
        }

        self.decode().map(|_| ())
    }

    /// Decodes the hex fields into the proof and the public signals, with the
    /// signal hash recomputed from `signal`.
    ///
    /// # Errors
    /// Returns an error on malformed hex or non-canonical field encodings.
    pub fn decode(&self) -> Result<(ZkProof, PublicSignals)> {
        let root = field_from_hex(&self.root).context("Invalid root")?;
        let nullifier_hash =
            NullifierHash::from_hex(&self.nullifier_hash).context("Invalid nullifier hash")?;
        let proof = hex::decode(self.proof.trim_start_matches("0x"))
            .context("Invalid proof hex")?;

        Ok((
            ZkProof(proof),
            PublicSignals::for_signal(root, nullifier_hash, self.signal.as_bytes()),
        ))
    }

    /// # Errors
    /// Returns an error if the file is missing, larger than `max_file_size`
    /// or not a submission.
    pub fn load(path: &Path, max_file_size: u64) -> Result<Self> {
        let content = read_bounded(path, max_file_size)?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse submission: {}", path.display()))
    }

    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize submission")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write submission: {}", path.display()))
    }
}

/// Ordered commitments of a group, as published by whoever registers
/// members. Leaf `i` of the tree is `commitments[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentList {
    pub depth: usize,
    pub commitments: Vec<String>,
}

impl CommitmentList {
    #[must_use]
    pub fn from_tree(tree: &MembershipTree) -> Self {
        Self {
            depth: tree.depth(),
            commitments: tree.leaves().map(|c| c.to_string()).collect(),
        }
    }

    /// # Errors
    /// Returns an error naming the first malformed entry.
    pub fn parse_commitments(&self) -> Result<Vec<Commitment>> {
        self.commitments
            .iter()
            .enumerate()
            .map(|(i, hex)| {
                field_from_hex(hex)
                    .map(Commitment)
                    .with_context(|| format!("Invalid commitment at index {i}"))
            })
            .collect()
    }

    /// Rebuilds the membership tree in publication order.
    ///
    /// # Errors
    /// Fails on malformed entries, duplicates, an unsupported depth or more
    /// commitments than the depth allows.
    pub fn build_tree(&self) -> Result<MembershipTree> {
        let commitments = self.parse_commitments()?;
        let tree = MembershipTree::from_commitments(self.depth, &commitments)
            .context("Failed to rebuild membership tree")?;
        debug!(
            "Rebuilt tree of {} commitments, root {}",
            tree.len(),
            field_to_hex(tree.root())
        );
        Ok(tree)
    }

    /// Rebuilds the group with the roots of its last `root_history_size`
    /// registrations still known.
    ///
    /// # Errors
    /// Same failures as [`CommitmentList::build_tree`].
    pub fn build_group(&self, root_history_size: usize) -> Result<Group> {
        let commitments = self.parse_commitments()?;
        Group::from_commitments(self.depth, &commitments, root_history_size)
            .context("Failed to rebuild group")
    }

    /// # Errors
    /// Returns an error if the file is missing, larger than `max_file_size`
    /// or not a commitment list.
    pub fn load(path: &Path, max_file_size: u64) -> Result<Self> {
        let content = read_bounded(path, max_file_size)?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse commitment list: {}", path.display()))
    }

    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize commitment list")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write commitment list: {}", path.display()))
    }
}

fn read_bounded(path: &Path, max_file_size: u64) -> Result<String> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to read file metadata: {}", path.display()))?;
    if metadata.len() > max_file_size {
        return Err(anyhow::anyhow!(
            "File too large: {} bytes (max: {} bytes)",
            metadata.len(),
            max_file_size
        ));
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
}
