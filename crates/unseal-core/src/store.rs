//! The `RecordStore` trait: an authorization-enforcing ciphertext ledger
//!
//! A record store is a serialized state machine. Every mutation checks the
//! caller against the store's current authority under the same critical
//! section that applies the change, so authorization can never race a
//! decryptor rotation. Accepted mutations append to an ordered event log
//! that subscribers observe in acceptance order.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::LedgerResult;
use crate::event::EventRecord;
use crate::identity::Identity;
use crate::record::{AuthoritySnapshot, DecryptionResult, RecordId};

/// An access-controlled store of encrypted records and their decryption
/// results.
///
/// The `caller` parameter on every mutation is the authenticated identity
/// performing the operation. Implementations treat it as already verified;
/// establishing it (signature checks, session auth) happens at the
/// transport seam, not here.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store `ciphertext` under `id`. Anyone may call this.
    ///
    /// Storing to an existing identifier replaces the ciphertext (last
    /// write wins) but leaves any accepted result untouched. Empty
    /// ciphertexts are rejected.
    ///
    /// Emits `CipherStored` on success.
    async fn store_ciphertext(
        &self,
        caller: Identity,
        id: RecordId,
        ciphertext: Vec<u8>,
    ) -> LedgerResult<()>;

    /// Signal that `caller` wants `id` decrypted. Anyone may call this.
    ///
    /// The request itself stores nothing and succeeds even if no
    /// ciphertext exists under `id` yet; it is a broadcast hint for
    /// decryptor workers, which re-check the record when they process it.
    ///
    /// Emits `DecryptionRequested`.
    async fn request_decryption(&self, caller: Identity, id: RecordId) -> LedgerResult<()>;

    /// Submit the plaintext for `id`. Only the current decryptor may call
    /// this.
    ///
    /// Fails with `Unauthorized` for any other caller, `NotFound` if no
    /// ciphertext exists under `id`, and `ResultAlreadySubmitted` if a
    /// result was already accepted (first write wins).
    ///
    /// Emits `DecryptionSubmitted` on success.
    async fn submit_result(
        &self,
        caller: Identity,
        id: RecordId,
        plaintext: Vec<u8>,
    ) -> LedgerResult<()>;

    /// Replace the decryptor authority. Only the owner may call this.
    ///
    /// Takes effect atomically: submissions accepted before the rotation
    /// were checked against the old decryptor, submissions after it
    /// against the new one. Emits `DecryptorUpdated` even when
    /// `new_decryptor` equals the current one.
    async fn set_decryptor(&self, caller: Identity, new_decryptor: Identity) -> LedgerResult<()>;

    /// Read the ciphertext stored under `id`, if any.
    async fn ciphertext(&self, id: RecordId) -> LedgerResult<Option<Vec<u8>>>;

    /// Read the accepted decryption result for `id`, if any.
    async fn decryption_result(&self, id: RecordId) -> LedgerResult<Option<DecryptionResult>>;

    /// Read the current owner, decryptor, and rotation epoch.
    async fn authority(&self) -> LedgerResult<AuthoritySnapshot>;

    /// Subscribe to the live event feed.
    ///
    /// Events arrive in acceptance order. A receiver that falls too far
    /// behind observes a `Lagged` error and can recover the gap through
    /// [`events_since`](Self::events_since).
    fn subscribe(&self) -> broadcast::Receiver<EventRecord>;

    /// Return all accepted events with sequence numbers greater than
    /// `after`, in order. `events_since(0)` replays the full log.
    async fn events_since(&self, after: u64) -> LedgerResult<Vec<EventRecord>>;
}
