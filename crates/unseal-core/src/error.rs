//! Error types for ledger operations

use thiserror::Error;

use crate::identity::Identity;
use crate::record::RecordId;

/// Errors surfaced synchronously by record store operations.
///
/// A failed operation never mutates state and is never retried by the
/// store itself; retry policy belongs to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The caller identity does not hold the role the operation requires.
    #[error("unauthorized: {action} is {required} (caller {caller:?})")]
    Unauthorized {
        /// The operation that was attempted.
        action: &'static str,
        /// The role that may perform it.
        required: &'static str,
        /// Who actually called.
        caller: Identity,
    },

    /// No ciphertext has been stored under this identifier.
    #[error("record {0} not found")]
    NotFound(RecordId),

    /// A result was already accepted for this identifier (first write wins).
    #[error("record {0} already has an accepted result")]
    ResultAlreadySubmitted(RecordId),

    /// Ciphertext blobs must be non-empty.
    #[error("ciphertext must not be empty")]
    EmptyCiphertext,
}

impl LedgerError {
    /// Build the rejection for a caller that is not the current decryptor.
    pub fn decryptor_only(action: &'static str, caller: Identity) -> Self {
        Self::Unauthorized {
            action,
            required: "decryptor only",
            caller,
        }
    }

    /// Build the rejection for a caller that is not the owner.
    pub fn owner_only(action: &'static str, caller: Identity) -> Self {
        Self::Unauthorized {
            action,
            required: "owner only",
            caller,
        }
    }
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
