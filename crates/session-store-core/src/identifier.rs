//! Session identifier issuance and validation.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use sha2::{Digest, Sha256};

/// Length of every issued identifier.
pub const IDENTIFIER_LEN: usize = 26;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generates and validates session identifiers.
///
/// Identifiers are not secrets: they only need to be unique across
/// concurrent session starts, so a hash over time, a process-wide sequence
/// and random bits is enough.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentifierIssuer;

impl IdentifierIssuer {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Issue a fresh 26-character lowercase hex identifier.
    #[must_use]
    pub fn generate(&self) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(nanos.to_le_bytes());
        hasher.update(seq.to_le_bytes());
        hasher.update(rand::random::<u64>().to_le_bytes());

        let mut id = hex::encode(hasher.finalize());
        id.truncate(IDENTIFIER_LEN);
        id
    }

    /// True iff `candidate` is non-empty and only holds ASCII letters,
    /// digits and hyphens.
    #[must_use]
    pub fn validate(&self, candidate: &str) -> bool {
        !candidate.is_empty()
            && candidate
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    }
}
