//! Error types for the decryptor worker

use thiserror::Error;

use unseal_core::LedgerError;

use crate::engine::EngineError;

/// Errors that can occur in worker operations
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A ledger call was rejected.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The decryption engine could not produce a plaintext.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Keystore I/O failed.
    #[error("keystore error: {0}")]
    Keystore(String),
}

/// Result type alias for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;
