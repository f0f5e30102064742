//! Ledger notifications
//!
//! Every accepted state change emits one [`LedgerEvent`], wrapped in an
//! [`EventRecord`] that carries its position in the append-only log.
//! Subscribers receive records in acceptance order; the sequence number
//! lets a consumer that lagged or restarted replay the gap from the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::record::RecordId;

/// Events emitted by the record store on every accepted state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    /// A ciphertext was stored (or overwritten) under an identifier.
    CipherStored {
        id: RecordId,
        submitter: Identity,
    },

    /// A party asked for the plaintext of an identifier.
    ///
    /// This is the only way the off-chain worker learns of demand;
    /// there is no polling contract.
    DecryptionRequested {
        id: RecordId,
        requester: Identity,
    },

    /// The authorized decryptor published a plaintext.
    DecryptionSubmitted {
        id: RecordId,
        plaintext: Vec<u8>,
        submitter: Identity,
    },

    /// The owner rotated the decryptor pointer.
    DecryptorUpdated {
        old: Identity,
        new: Identity,
    },
}

impl LedgerEvent {
    /// The record this event concerns, if any.
    pub fn record_id(&self) -> Option<RecordId> {
        match self {
            Self::CipherStored { id, .. } => Some(*id),
            Self::DecryptionRequested { id, .. } => Some(*id),
            Self::DecryptionSubmitted { id, .. } => Some(*id),
            Self::DecryptorUpdated { .. } => None,
        }
    }

    /// Event kind name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CipherStored { .. } => "cipher_stored",
            Self::DecryptionRequested { .. } => "decryption_requested",
            Self::DecryptionSubmitted { .. } => "decryption_submitted",
            Self::DecryptorUpdated { .. } => "decryptor_updated",
        }
    }
}

/// A sequenced, timestamped entry in the ledger's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Position in the log: strictly increasing from 1, in the order
    /// operations were accepted.
    pub seq: u64,
    /// Ledger time when the operation was accepted.
    pub at: DateTime<Utc>,
    /// What happened.
    pub event: LedgerEvent,
}
