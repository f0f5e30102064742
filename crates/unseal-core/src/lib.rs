//! # Unseal Core
//!
//! Core traits, types, and errors for the Unseal stack.
//!
//! This crate defines the contract between the record ledger (which holds
//! ciphertexts and enforces who may do what) and the decryptor workers
//! that watch its event feed and submit plaintexts. Both sides depend on
//! this crate and nothing else in the workspace.
//!
//! ## Key Traits
//!
//! - [`RecordStore`]: Access-controlled ciphertext ledger with an ordered event feed
//!
//! ## Key Types
//!
//! - [`Identity`]: A participant's public identity (ed25519 verifying key bytes)
//! - [`RecordId`]: Caller-chosen identifier for a stored ciphertext
//! - [`Record`]: A stored ciphertext plus its accepted result, if any
//! - [`LedgerEvent`]: Events emitted by accepted mutations
//! - [`LedgerError`]: Why an operation was rejected

pub mod error;
pub mod event;
pub mod identity;
pub mod record;
pub mod store;

// Re-export main types
pub use error::*;
pub use event::*;
pub use identity::*;
pub use record::*;
pub use store::*;
