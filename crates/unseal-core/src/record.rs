//! Ledger record types
//!
//! A [`Record`] is the per-identifier state held by the record store:
//! the ciphertext blob, who stored it, and the accepted decryption
//! result once one exists. Records are never deleted; together with the
//! event log they form the audit trail of the protocol.

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Opaque, caller-chosen identifier for a stored ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Per-identifier state on the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// The stored ciphertext, treated as an uninterpreted blob.
    pub ciphertext: Vec<u8>,
    /// Who stored (or last overwrote) the ciphertext.
    pub stored_by: Identity,
    /// Ledger time of the latest store.
    pub stored_at: DateTime<Utc>,
    /// The accepted decryption result, if any. Set at most once.
    pub result: Option<DecryptionResult>,
}

impl Record {
    /// Whether a decryption result has been accepted for this record.
    pub fn is_decrypted(&self) -> bool {
        self.result.is_some()
    }
}

/// A decryption result accepted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionResult {
    /// The published plaintext, readable by anyone.
    pub plaintext: Vec<u8>,
    /// The decryptor identity that submitted it.
    pub submitted_by: Identity,
    /// Ledger time of acceptance.
    pub submitted_at: DateTime<Utc>,
}

/// Snapshot of the authorization registry.
///
/// `owner` is fixed at initialization; `decryptor` is the single mutable
/// authority pointer and is never empty. `epoch` counts rotations, so a
/// reader can tell two snapshots with the same decryptor apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritySnapshot {
    /// The identity that initialized the store; may rotate the decryptor.
    pub owner: Identity,
    /// The single identity currently authorized to submit results.
    pub decryptor: Identity,
    /// Rotation count, bumped on every accepted `set_decryptor`.
    pub epoch: u64,
}
