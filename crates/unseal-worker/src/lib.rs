//! # Unseal Worker
//!
//! The off-chain decryptor: subscribes to a ledger's event feed, and for
//! every decryption request fetches the ciphertext, consults an access
//! policy, runs the decryption engine, and submits the plaintext back
//! under its own identity.
//!
//! The worker keeps no state of its own between requests. Catch-up after
//! a restart is a log replay from the configured cursor, and a lagged
//! live feed is repaired the same way, so no request the ledger accepted
//! goes unhandled.
//!
//! ## Key Types
//!
//! - [`DecryptorWorker`]: The subscriber task
//! - [`DecryptionEngine`]: How ciphertexts are opened ([`MirrorEngine`], [`SharedKeyEngine`])
//! - [`AccessPolicy`]: Who may have plaintexts published ([`AllowAll`], [`Allowlist`])
//! - [`Keystore`]: Decryptor identity persistence

pub mod config;
pub mod engine;
pub mod error;
pub mod keystore;
pub mod policy;

pub use config::WorkerConfig;
pub use engine::{DecryptionEngine, EngineError, MirrorEngine, SharedKeyEngine};
pub use error::{WorkerError, WorkerResult};
pub use keystore::Keystore;
pub use policy::{AccessPolicy, AllowAll, Allowlist, PolicyDecision};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use unseal_core::{EventRecord, Identity, LedgerError, LedgerEvent, RecordId, RecordStore};

/// How a single decryption request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Plaintext accepted by the ledger.
    Submitted,
    /// The access policy refused the requester.
    Denied,
    /// A result already existed, nothing to do.
    AlreadyDecrypted,
    /// No ciphertext is stored under the requested identifier.
    MissingCiphertext,
    /// The engine could not open the blob.
    EngineFailed,
    /// The ledger rejected the submission.
    SubmitFailed,
    /// A read against the ledger failed.
    FetchFailed,
}

/// Counters the worker keeps while running.
#[derive(Debug, Default)]
pub struct WorkerStats {
    requests_seen: AtomicU64,
    submitted: AtomicU64,
    denied: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl WorkerStats {
    fn record(&self, outcome: RequestOutcome) {
        let counter = match outcome {
            RequestOutcome::Submitted => &self.submitted,
            RequestOutcome::Denied => &self.denied,
            RequestOutcome::AlreadyDecrypted | RequestOutcome::MissingCiphertext => &self.skipped,
            RequestOutcome::EngineFailed
            | RequestOutcome::SubmitFailed
            | RequestOutcome::FetchFailed => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Current values of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_seen: self.requests_seen.load(Ordering::SeqCst),
            submitted: self.submitted.load(Ordering::SeqCst),
            denied: self.denied.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of the worker counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Decryption requests observed on the feed.
    pub requests_seen: u64,
    /// Plaintexts accepted by the ledger.
    pub submitted: u64,
    /// Requests the access policy refused.
    pub denied: u64,
    /// Requests skipped: result already present or no ciphertext stored.
    pub skipped: u64,
    /// Requests that failed in the engine or at submission.
    pub failed: u64,
}

/// The decryptor worker task.
///
/// Owns a subscription to the ledger's event feed and turns every
/// `DecryptionRequested` into a fetch / authorize / decrypt / submit
/// pipeline. Requests are handled concurrently, bounded by
/// `max_in_flight`; everything else on the feed is consumed in order.
pub struct DecryptorWorker<S: RecordStore + 'static> {
    /// Identity submissions are attributed to
    identity: Identity,
    /// The ledger being watched
    store: Arc<S>,
    /// Decryption backend
    engine: Arc<dyn DecryptionEngine>,
    /// Who may have plaintexts published for them
    policy: Arc<dyn AccessPolicy>,
    /// Worker configuration
    config: WorkerConfig,
    /// Request counters, shared with callers via [`DecryptorWorker::stats`]
    stats: Arc<WorkerStats>,
    /// Bounds concurrent request handling
    limiter: Arc<Semaphore>,
    /// Shutdown signal
    shutdown_rx: broadcast::Receiver<()>,
}

impl<S: RecordStore + 'static> DecryptorWorker<S> {
    /// Create a new worker.
    pub fn new(
        identity: Identity,
        store: Arc<S>,
        engine: Arc<dyn DecryptionEngine>,
        policy: Arc<dyn AccessPolicy>,
        config: WorkerConfig,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            identity,
            store,
            engine,
            policy,
            config,
            stats: Arc::new(WorkerStats::default()),
            limiter,
            shutdown_rx,
        }
    }

    /// The identity submissions are attributed to.
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Counters shared with the running task.
    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.stats)
    }

    /// Spawn the worker as a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the worker loop.
    async fn run(mut self) {
        info!(
            identity = %self.identity.short(),
            resume_from = self.config.resume_from,
            max_in_flight = self.config.max_in_flight,
            "Decryptor worker started"
        );

        // Subscribe before replaying so nothing accepted in between is
        // missed; the sequence cursor deduplicates the overlap.
        let mut feed = self.store.subscribe();
        let mut last_seq = self.replay_from(self.config.resume_from).await;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Decryptor worker shutting down");
                    break;
                }
                received = feed.recv() => match received {
                    Ok(record) => {
                        if record.seq <= last_seq {
                            trace!(seq = record.seq, "Skipping already replayed event");
                            continue;
                        }
                        last_seq = record.seq;
                        self.dispatch(record);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Event feed lagged, replaying from the log");
                        last_seq = self.replay_from(last_seq).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Event feed closed, worker stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Replay logged events after `after`, returning the new cursor.
    async fn replay_from(&self, after: u64) -> u64 {
        match self.store.events_since(after).await {
            Ok(backlog) => {
                let mut cursor = after;
                if !backlog.is_empty() {
                    info!(from = after, count = backlog.len(), "Replaying event backlog");
                }
                for record in backlog {
                    cursor = record.seq;
                    self.dispatch(record);
                }
                cursor
            }
            Err(e) => {
                warn!(error = %e, "Failed to read event backlog");
                after
            }
        }
    }

    /// React to one event record.
    fn dispatch(&self, record: EventRecord) {
        match record.event {
            LedgerEvent::DecryptionRequested { id, requester } => {
                self.stats.requests_seen.fetch_add(1, Ordering::SeqCst);

                let limiter = Arc::clone(&self.limiter);
                let identity = self.identity;
                let store = Arc::clone(&self.store);
                let engine = Arc::clone(&self.engine);
                let policy = Arc::clone(&self.policy);
                let stats = Arc::clone(&self.stats);
                tokio::spawn(async move {
                    // The limiter is never closed, so this only fails if
                    // the whole runtime is going away.
                    let Ok(_permit) = limiter.acquire_owned().await else {
                        return;
                    };
                    let outcome = handle_request(
                        &identity,
                        store.as_ref(),
                        engine.as_ref(),
                        policy.as_ref(),
                        id,
                        &requester,
                    )
                    .await;
                    stats.record(outcome);
                });
            }
            LedgerEvent::DecryptorUpdated { old, new } => {
                if new == self.identity {
                    info!(old = %old.short(), "This worker is now the decryptor");
                } else if old == self.identity {
                    warn!(new = %new.short(), "This worker lost the decryptor role");
                }
            }
            other => {
                trace!(kind = other.kind(), "Ignoring event");
            }
        }
    }
}

/// Process one decryption request against the ledger.
///
/// Fetch the ciphertext, consult the policy, decrypt, submit. Every exit
/// path is logged here; the caller folds the outcome into the counters.
#[instrument(skip(identity, store, engine, policy), fields(id = %id, requester = %requester.short()))]
pub async fn handle_request<S: RecordStore + ?Sized>(
    identity: &Identity,
    store: &S,
    engine: &dyn DecryptionEngine,
    policy: &dyn AccessPolicy,
    id: RecordId,
    requester: &Identity,
) -> RequestOutcome {
    // Another worker, or an earlier replay pass, may have finished this
    // one already.
    match store.decryption_result(id).await {
        Ok(Some(_)) => {
            debug!("Result already published, skipping");
            return RequestOutcome::AlreadyDecrypted;
        }
        Ok(None) => {}
        Err(e) => {
            warn!(error = %e, "Failed to check for an existing result");
            return RequestOutcome::FetchFailed;
        }
    }

    let ciphertext = match store.ciphertext(id).await {
        Ok(Some(blob)) => blob,
        Ok(None) => {
            debug!("No ciphertext stored, skipping request");
            return RequestOutcome::MissingCiphertext;
        }
        Err(e) => {
            warn!(error = %e, "Failed to fetch ciphertext");
            return RequestOutcome::FetchFailed;
        }
    };

    match policy.authorize(requester, id).await {
        PolicyDecision::Allow => {}
        PolicyDecision::Deny { reason } => {
            info!(
                reason = reason.as_deref().unwrap_or("no reason given"),
                "Denied decryption request"
            );
            return RequestOutcome::Denied;
        }
    }

    let plaintext = match engine.decrypt(&ciphertext, requester).await {
        Ok(plaintext) => plaintext,
        Err(e) => {
            warn!(error = %e, "Engine failed to open the blob");
            return RequestOutcome::EngineFailed;
        }
    };

    match store.submit_result(*identity, id, plaintext).await {
        Ok(()) => {
            info!("Submitted decryption result");
            RequestOutcome::Submitted
        }
        Err(LedgerError::ResultAlreadySubmitted(_)) => {
            // Lost a race against another submitter; the record is done.
            debug!("Result landed elsewhere first, skipping");
            RequestOutcome::AlreadyDecrypted
        }
        Err(e) => {
            warn!(error = %e, "Ledger rejected the submission");
            RequestOutcome::SubmitFailed
        }
    }
}
