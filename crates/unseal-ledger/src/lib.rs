//! # Unseal Ledger
//!
//! The in-process record ledger: an [`InMemoryLedger`] implementing the
//! [`RecordStore`](unseal_core::RecordStore) contract with a single lock
//! around all state, so authorization checks and the mutations they guard
//! are atomic with respect to decryptor rotation.
//!
//! The ledger keeps a full ordered event log alongside the live broadcast
//! feed. Subscribers that lag or attach late replay the gap with
//! [`RecordStore::events_since`](unseal_core::RecordStore::events_since).

pub mod memory;

pub use memory::{DEFAULT_EVENT_CAPACITY, InMemoryLedger};
