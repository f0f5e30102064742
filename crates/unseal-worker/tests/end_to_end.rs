//! End-to-end tests for the decryptor worker
//!
//! A real ledger, a running worker, and scripted parties: these tests
//! drive the full store / request / decrypt / submit pipeline the way a
//! deployment would, including the deny, failure, rotation, and catch-up
//! paths. Waiting is always bounded by a timeout and driven by the
//! worker's counters or the event feed, never by bare sleeps.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use unseal_core::{EventRecord, Identity, Keypair, LedgerEvent, RecordId, RecordStore};
use unseal_ledger::InMemoryLedger;
use unseal_worker::{
    AccessPolicy, AllowAll, Allowlist, DecryptionEngine, DecryptorWorker, EngineError,
    MirrorEngine, SharedKeyEngine, StatsSnapshot, WorkerConfig, WorkerStats,
};

const WAIT: Duration = Duration::from_secs(5);

struct Parties {
    owner: Identity,
    alice: Identity,
}

fn parties() -> Parties {
    Parties {
        owner: Keypair::generate().identity(),
        alice: Keypair::generate().identity(),
    }
}

struct RunningWorker {
    identity: Identity,
    stats: Arc<WorkerStats>,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

fn start_worker(
    ledger: &Arc<InMemoryLedger>,
    engine: Arc<dyn DecryptionEngine>,
    policy: Arc<dyn AccessPolicy>,
    config: WorkerConfig,
) -> RunningWorker {
    let identity = Keypair::generate().identity();
    start_worker_as(identity, ledger, engine, policy, config)
}

fn start_worker_as(
    identity: Identity,
    ledger: &Arc<InMemoryLedger>,
    engine: Arc<dyn DecryptionEngine>,
    policy: Arc<dyn AccessPolicy>,
    config: WorkerConfig,
) -> RunningWorker {
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let worker = DecryptorWorker::new(
        identity,
        Arc::clone(ledger),
        engine,
        policy,
        config,
        shutdown_rx,
    );
    let stats = worker.stats();
    let handle = worker.spawn();
    RunningWorker {
        identity,
        stats,
        shutdown,
        handle,
    }
}

/// Poll the worker counters until `field` reaches `at_least`.
async fn wait_for_stat(stats: &WorkerStats, field: fn(&StatsSnapshot) -> u64, at_least: u64) {
    timeout(WAIT, async {
        loop {
            if field(&stats.snapshot()) >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("counter did not reach the expected value before the deadline");
}

/// Wait until the feed carries a submission for `id`, returning its plaintext.
async fn wait_for_submission(feed: &mut broadcast::Receiver<EventRecord>, id: RecordId) -> Vec<u8> {
    timeout(WAIT, async {
        loop {
            if let Ok(record) = feed.recv().await
                && let LedgerEvent::DecryptionSubmitted {
                    id: got, plaintext, ..
                } = record.event
                && got == id
            {
                return plaintext;
            }
        }
    })
    .await
    .expect("no submission appeared before the deadline")
}

/// An engine whose backend is permanently down.
struct FailingEngine;

#[async_trait]
impl DecryptionEngine for FailingEngine {
    async fn decrypt(&self, _: &[u8], _: &Identity) -> Result<Vec<u8>, EngineError> {
        Err(EngineError::Failed("backend offline".to_string()))
    }
}

// ============================================================================
// Round Trip
// ============================================================================

/// The full pipeline: store a sealed blob, request as a third party, and
/// watch the worker publish the recovered plaintext.
#[tokio::test]
async fn test_round_trip_via_worker() {
    let p = parties();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, Identity::from_bytes([0; 32])));
    let worker = start_worker(
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default(),
    );
    ledger
        .set_decryptor(p.owner, worker.identity)
        .await
        .unwrap();

    let id = RecordId(1);
    let mut feed = ledger.subscribe();
    ledger
        .store_ciphertext(p.owner, id, MirrorEngine::seal(b"salary:1000"))
        .await
        .unwrap();
    ledger.request_decryption(p.alice, id).await.unwrap();

    let plaintext = wait_for_submission(&mut feed, id).await;
    assert_eq!(plaintext, b"salary:1000".to_vec());

    let result = ledger.decryption_result(id).await.unwrap().unwrap();
    assert_eq!(result.plaintext, b"salary:1000".to_vec());
    assert_eq!(result.submitted_by, worker.identity);

    wait_for_stat(&worker.stats, |s| s.submitted, 1).await;
    let snapshot = worker.stats.snapshot();
    assert_eq!(snapshot.requests_seen, 1);
    assert_eq!(snapshot.submitted, 1);
    assert_eq!(snapshot.failed, 0);
}

/// Requests accepted before the worker started are served from the log.
#[tokio::test]
async fn test_backlog_replayed_on_startup() {
    let p = parties();
    let decryptor = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, decryptor));

    ledger
        .store_ciphertext(p.owner, RecordId(1), MirrorEngine::seal(b"early bird"))
        .await
        .unwrap();
    ledger
        .request_decryption(p.alice, RecordId(1))
        .await
        .unwrap();

    // Worker attaches only now, with the default zero cursor.
    let worker = start_worker_as(
        decryptor,
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default(),
    );

    wait_for_stat(&worker.stats, |s| s.submitted, 1).await;
    let result = ledger.decryption_result(RecordId(1)).await.unwrap().unwrap();
    assert_eq!(result.plaintext, b"early bird".to_vec());
}

/// A resume cursor skips requests that were already handled in a
/// previous run.
#[tokio::test]
async fn test_resume_cursor_skips_old_requests() {
    let p = parties();
    let decryptor = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, decryptor));

    ledger
        .store_ciphertext(p.owner, RecordId(1), MirrorEngine::seal(b"seen before"))
        .await
        .unwrap();
    ledger
        .request_decryption(p.alice, RecordId(1))
        .await
        .unwrap();
    let cursor = ledger.event_count().await;

    let worker = start_worker_as(
        decryptor,
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default().with_resume_from(cursor),
    );

    // Only the fresh request is observed.
    ledger
        .request_decryption(p.alice, RecordId(1))
        .await
        .unwrap();
    wait_for_stat(&worker.stats, |s| s.submitted, 1).await;
    assert_eq!(worker.stats.snapshot().requests_seen, 1);
}

/// The ChaCha20-Poly1305 engine works through the same pipeline as the
/// demo cipher.
#[tokio::test]
async fn test_shared_key_engine_round_trip() {
    let p = parties();
    let engine = SharedKeyEngine::generate();
    let sealed = engine.seal(b"the meeting is at noon").unwrap();

    let decryptor = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, decryptor));
    let _worker = start_worker_as(
        decryptor,
        &ledger,
        Arc::new(engine),
        Arc::new(AllowAll),
        WorkerConfig::default(),
    );

    let id = RecordId(1);
    let mut feed = ledger.subscribe();
    ledger.store_ciphertext(p.owner, id, sealed).await.unwrap();
    ledger.request_decryption(p.alice, id).await.unwrap();

    let plaintext = wait_for_submission(&mut feed, id).await;
    assert_eq!(plaintext, b"the meeting is at noon".to_vec());
}

// ============================================================================
// Deny and Failure Paths
// ============================================================================

/// A requester outside the allowlist is refused: no result appears and
/// the denial is counted.
#[tokio::test]
async fn test_policy_denies_unlisted_requester() {
    let p = parties();
    let bob = Keypair::generate().identity();
    let decryptor = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, decryptor));
    let worker = start_worker_as(
        decryptor,
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(Allowlist::new([bob])),
        WorkerConfig::default(),
    );

    let id = RecordId(1);
    ledger
        .store_ciphertext(p.owner, id, MirrorEngine::seal(b"for bob only"))
        .await
        .unwrap();
    ledger.request_decryption(p.alice, id).await.unwrap();

    wait_for_stat(&worker.stats, |s| s.denied, 1).await;
    assert_eq!(ledger.decryption_result(id).await.unwrap(), None);

    // The listed party still gets served.
    let mut feed = ledger.subscribe();
    ledger.request_decryption(bob, id).await.unwrap();
    let plaintext = wait_for_submission(&mut feed, id).await;
    assert_eq!(plaintext, b"for bob only".to_vec());

    let snapshot = worker.stats.snapshot();
    assert_eq!(snapshot.denied, 1);
    assert_eq!(snapshot.submitted, 1);
}

/// An engine failure drops the request without submitting and without
/// retrying.
#[tokio::test]
async fn test_engine_failure_drops_request() {
    let p = parties();
    let decryptor = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, decryptor));
    let worker = start_worker_as(
        decryptor,
        &ledger,
        Arc::new(FailingEngine),
        Arc::new(AllowAll),
        WorkerConfig::default(),
    );

    let id = RecordId(1);
    ledger
        .store_ciphertext(p.owner, id, b"whatever".to_vec())
        .await
        .unwrap();
    ledger.request_decryption(p.alice, id).await.unwrap();

    wait_for_stat(&worker.stats, |s| s.failed, 1).await;
    assert_eq!(ledger.decryption_result(id).await.unwrap(), None);
    assert_eq!(worker.stats.snapshot().failed, 1);
}

/// A request for an identifier with no stored ciphertext is skipped, and
/// a later store plus re-request is served normally.
#[tokio::test]
async fn test_missing_ciphertext_skipped_then_served() {
    let p = parties();
    let decryptor = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, decryptor));
    let worker = start_worker_as(
        decryptor,
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default(),
    );

    let id = RecordId(9);
    ledger.request_decryption(p.alice, id).await.unwrap();
    wait_for_stat(&worker.stats, |s| s.skipped, 1).await;
    assert_eq!(ledger.decryption_result(id).await.unwrap(), None);

    let mut feed = ledger.subscribe();
    ledger
        .store_ciphertext(p.owner, id, MirrorEngine::seal(b"now it exists"))
        .await
        .unwrap();
    ledger.request_decryption(p.alice, id).await.unwrap();
    let plaintext = wait_for_submission(&mut feed, id).await;
    assert_eq!(plaintext, b"now it exists".to_vec());
}

/// A worker whose identity is not the ledger's decryptor has its
/// submissions rejected and publishes nothing.
#[tokio::test]
async fn test_unauthorized_worker_cannot_publish() {
    let p = parties();
    let real_decryptor = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, real_decryptor));

    // Fresh random identity, never appointed.
    let imposter = start_worker(
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default(),
    );

    let id = RecordId(2);
    ledger
        .store_ciphertext(p.owner, id, MirrorEngine::seal(b"secret"))
        .await
        .unwrap();
    ledger.request_decryption(p.alice, id).await.unwrap();

    wait_for_stat(&imposter.stats, |s| s.failed, 1).await;
    assert_eq!(ledger.decryption_result(id).await.unwrap(), None);
}

// ============================================================================
// Rotation
// ============================================================================

/// Two workers across a rotation: results are always attributed to the
/// decryptor in effect when the request was served.
#[tokio::test]
async fn test_rotation_moves_authority_between_workers() {
    let p = parties();
    let worker_a_id = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, worker_a_id));

    let worker_a = start_worker_as(
        worker_a_id,
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default(),
    );
    let worker_b = start_worker(
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default(),
    );

    // Leg one: worker A holds the role.
    let mut feed = ledger.subscribe();
    ledger
        .store_ciphertext(p.owner, RecordId(1), MirrorEngine::seal(b"first"))
        .await
        .unwrap();
    ledger
        .request_decryption(p.alice, RecordId(1))
        .await
        .unwrap();
    wait_for_submission(&mut feed, RecordId(1)).await;
    let first = ledger
        .decryption_result(RecordId(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.submitted_by, worker_a.identity);

    // Rotate to worker B.
    ledger
        .set_decryptor(p.owner, worker_b.identity)
        .await
        .unwrap();

    // Leg two: only worker B can publish now.
    ledger
        .store_ciphertext(p.owner, RecordId(2), MirrorEngine::seal(b"second"))
        .await
        .unwrap();
    ledger
        .request_decryption(p.alice, RecordId(2))
        .await
        .unwrap();
    let plaintext = wait_for_submission(&mut feed, RecordId(2)).await;
    assert_eq!(plaintext, b"second".to_vec());
    let second = ledger
        .decryption_result(RecordId(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.submitted_by, worker_b.identity);
}

// ============================================================================
// Concurrency and Feed Behavior
// ============================================================================

/// Many concurrent requests under a small in-flight bound: all of them
/// get served, none lost.
#[tokio::test]
async fn test_many_requests_under_small_bound() {
    let p = parties();
    let decryptor = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, decryptor));
    let worker = start_worker_as(
        decryptor,
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default().with_max_in_flight(2),
    );

    let count = 8u64;
    for i in 0..count {
        ledger
            .store_ciphertext(
                p.owner,
                RecordId(i),
                MirrorEngine::seal(format!("payload-{i}").as_bytes()),
            )
            .await
            .unwrap();
        ledger
            .request_decryption(p.alice, RecordId(i))
            .await
            .unwrap();
    }

    wait_for_stat(&worker.stats, |s| s.submitted, count).await;
    for i in 0..count {
        let result = ledger
            .decryption_result(RecordId(i))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.plaintext, format!("payload-{i}").into_bytes());
    }
    assert_eq!(worker.stats.snapshot().requests_seen, count);
}

/// Duplicate requests for the same record produce exactly one result;
/// the extra handling is counted as skipped, never as a failure.
#[tokio::test]
async fn test_duplicate_requests_one_result() {
    let p = parties();
    let decryptor = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, decryptor));
    let worker = start_worker_as(
        decryptor,
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default(),
    );

    let id = RecordId(1);
    ledger
        .store_ciphertext(p.owner, id, MirrorEngine::seal(b"once"))
        .await
        .unwrap();
    ledger.request_decryption(p.alice, id).await.unwrap();
    ledger.request_decryption(p.alice, id).await.unwrap();

    wait_for_stat(&worker.stats, |s| s.submitted + s.skipped, 2).await;
    let snapshot = worker.stats.snapshot();
    assert_eq!(snapshot.requests_seen, 2);
    assert_eq!(snapshot.submitted, 1);
    assert_eq!(snapshot.skipped, 1);
    assert_eq!(snapshot.failed, 0);

    let result = ledger.decryption_result(id).await.unwrap().unwrap();
    assert_eq!(result.plaintext, b"once".to_vec());
}

/// A live feed too small for the burst still loses nothing: the worker
/// falls back to the durable log and serves every request.
#[tokio::test]
async fn test_tiny_feed_capacity_loses_nothing() {
    let p = parties();
    let decryptor = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::with_capacity(p.owner, decryptor, 4));
    let worker = start_worker_as(
        decryptor,
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default(),
    );

    // 12 stores + 12 requests = 24 events against a capacity of 4.
    let count = 12u64;
    for i in 0..count {
        ledger
            .store_ciphertext(
                p.owner,
                RecordId(i),
                MirrorEngine::seal(format!("burst-{i}").as_bytes()),
            )
            .await
            .unwrap();
        ledger
            .request_decryption(p.alice, RecordId(i))
            .await
            .unwrap();
    }

    wait_for_stat(&worker.stats, |s| s.submitted, count).await;
    for i in 0..count {
        let result = ledger
            .decryption_result(RecordId(i))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.plaintext, format!("burst-{i}").into_bytes());
    }
    // Each request was handled exactly once despite the replays.
    assert_eq!(worker.stats.snapshot().requests_seen, count);
}

// ============================================================================
// Shutdown
// ============================================================================

/// The shutdown signal stops the worker loop promptly.
#[tokio::test]
async fn test_shutdown_stops_worker() {
    let p = parties();
    let decryptor = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(p.owner, decryptor));
    let worker = start_worker_as(
        decryptor,
        &ledger,
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default(),
    );

    worker.shutdown.send(()).unwrap();
    timeout(WAIT, worker.handle)
        .await
        .expect("worker did not stop before the deadline")
        .unwrap();

    // The ledger itself is unaffected by the worker going away.
    ledger
        .store_ciphertext(p.owner, RecordId(1), b"still here".to_vec())
        .await
        .unwrap();
    assert_eq!(ledger.record_count().await, 1);
}
