//! In-memory record ledger
//!
//! This module provides the reference [`RecordStore`] implementation,
//! suitable for in-process deployments and tests. Durable backends plug
//! in behind the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

use unseal_core::{
    AuthoritySnapshot, DecryptionResult, EventRecord, Identity, LedgerError, LedgerEvent,
    LedgerResult, Record, RecordId, RecordStore,
};

/// Default capacity of the live event feed.
///
/// Receivers that fall more than this many events behind see a `Lagged`
/// error and recover through `events_since`.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Everything the ledger knows, guarded by one lock.
struct LedgerState {
    /// Per-identifier records.
    records: HashMap<RecordId, Record>,
    /// Current owner, decryptor, and rotation epoch.
    authority: AuthoritySnapshot,
    /// Append-only log of accepted events, `log[i].seq == i + 1`.
    log: Vec<EventRecord>,
}

/// In-memory implementation of [`RecordStore`].
///
/// Uses a single `RwLock` over all state so that every authorization
/// check and the mutation it guards run in one critical section; a
/// decryptor rotation can never interleave between them. Events are
/// sequenced and pushed to the broadcast feed while the write lock is
/// still held, so the live feed preserves acceptance order.
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
    events: broadcast::Sender<EventRecord>,
}

impl InMemoryLedger {
    /// Create a ledger owned by `owner` with `decryptor` as the initial
    /// decryption authority.
    pub fn new(owner: Identity, decryptor: Identity) -> Self {
        Self::with_capacity(owner, decryptor, DEFAULT_EVENT_CAPACITY)
    }

    /// Create a ledger with a custom live-feed capacity.
    pub fn with_capacity(owner: Identity, decryptor: Identity, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        info!(
            owner = %owner.short(),
            decryptor = %decryptor.short(),
            "ledger initialized"
        );
        Self {
            state: RwLock::new(LedgerState {
                records: HashMap::new(),
                authority: AuthoritySnapshot {
                    owner,
                    decryptor,
                    epoch: 0,
                },
                log: Vec::new(),
            }),
            events,
        }
    }

    /// Number of records currently stored.
    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Number of events accepted so far.
    pub async fn event_count(&self) -> u64 {
        self.state.read().await.log.len() as u64
    }

    /// Sequence, timestamp, log, and broadcast an accepted event.
    ///
    /// Must be called with the write lock held; sending before the lock
    /// drops is what keeps the live feed in acceptance order. A send
    /// error only means no receiver is attached.
    fn append(&self, state: &mut LedgerState, event: LedgerEvent) -> u64 {
        let seq = state.log.len() as u64 + 1;
        let record = EventRecord {
            seq,
            at: Utc::now(),
            event,
        };
        let _ = self.events.send(record.clone());
        state.log.push(record);
        seq
    }
}

#[async_trait]
impl RecordStore for InMemoryLedger {
    async fn store_ciphertext(
        &self,
        caller: Identity,
        id: RecordId,
        ciphertext: Vec<u8>,
    ) -> LedgerResult<()> {
        if ciphertext.is_empty() {
            return Err(LedgerError::EmptyCiphertext);
        }

        let mut state = self.state.write().await;
        let now = Utc::now();
        let entry = state.records.entry(id).or_insert_with(|| Record {
            ciphertext: Vec::new(),
            stored_by: caller,
            stored_at: now,
            result: None,
        });
        // Last write wins for the blob; an already accepted result stays.
        entry.ciphertext = ciphertext;
        entry.stored_by = caller;
        entry.stored_at = now;

        let seq = self.append(&mut state, LedgerEvent::CipherStored { id, submitter: caller });
        debug!(id = %id, submitter = %caller.short(), seq, "ciphertext stored");
        Ok(())
    }

    async fn request_decryption(&self, caller: Identity, id: RecordId) -> LedgerResult<()> {
        let mut state = self.state.write().await;
        let seq = self.append(
            &mut state,
            LedgerEvent::DecryptionRequested {
                id,
                requester: caller,
            },
        );
        debug!(id = %id, requester = %caller.short(), seq, "decryption requested");
        Ok(())
    }

    async fn submit_result(
        &self,
        caller: Identity,
        id: RecordId,
        plaintext: Vec<u8>,
    ) -> LedgerResult<()> {
        let mut state = self.state.write().await;

        // Checked against the decryptor of this critical section, not a
        // snapshot taken before the lock.
        if caller != state.authority.decryptor {
            return Err(LedgerError::decryptor_only("submit_result", caller));
        }

        let record = state.records.get_mut(&id).ok_or(LedgerError::NotFound(id))?;
        if record.result.is_some() {
            return Err(LedgerError::ResultAlreadySubmitted(id));
        }
        record.result = Some(DecryptionResult {
            plaintext: plaintext.clone(),
            submitted_by: caller,
            submitted_at: Utc::now(),
        });

        let seq = self.append(
            &mut state,
            LedgerEvent::DecryptionSubmitted {
                id,
                plaintext,
                submitter: caller,
            },
        );
        info!(id = %id, submitter = %caller.short(), seq, "decryption result accepted");
        Ok(())
    }

    async fn set_decryptor(&self, caller: Identity, new_decryptor: Identity) -> LedgerResult<()> {
        let mut state = self.state.write().await;

        if caller != state.authority.owner {
            return Err(LedgerError::owner_only("set_decryptor", caller));
        }

        let old = state.authority.decryptor;
        state.authority.decryptor = new_decryptor;
        state.authority.epoch += 1;
        let epoch = state.authority.epoch;

        let seq = self.append(
            &mut state,
            LedgerEvent::DecryptorUpdated {
                old,
                new: new_decryptor,
            },
        );
        info!(
            old = %old.short(),
            new = %new_decryptor.short(),
            epoch,
            seq,
            "decryptor rotated"
        );
        Ok(())
    }

    async fn ciphertext(&self, id: RecordId) -> LedgerResult<Option<Vec<u8>>> {
        let state = self.state.read().await;
        Ok(state.records.get(&id).map(|r| r.ciphertext.clone()))
    }

    async fn decryption_result(&self, id: RecordId) -> LedgerResult<Option<DecryptionResult>> {
        let state = self.state.read().await;
        Ok(state.records.get(&id).and_then(|r| r.result.clone()))
    }

    async fn authority(&self) -> LedgerResult<AuthoritySnapshot> {
        Ok(self.state.read().await.authority)
    }

    fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    async fn events_since(&self, after: u64) -> LedgerResult<Vec<EventRecord>> {
        let state = self.state.read().await;
        // Dense sequence numbers: log[i].seq == i + 1, so events with
        // seq > after start at index `after`.
        Ok(state.log.iter().skip(after as usize).cloned().collect())
    }
}
