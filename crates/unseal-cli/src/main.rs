//! Unseal - Access-Controlled Decryption
//!
//! A command-line front end for the unseal protocol: a record ledger
//! guarded by an owner and a single appointed decryptor, plus the
//! off-chain worker that serves decryption requests.
//!
//! ## Usage
//!
//! ```bash
//! # Generate (or show) the decryptor identity for a data directory
//! unseal keygen
//!
//! # Run a ledger with a live worker and an interactive prompt
//! unseal serve
//!
//! # Demo mode: scripted store / request / rotate walkthrough
//! unseal demo
//! ```

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::info;

use unseal_core::{
    DecryptionResult, EventRecord, Identity, Keypair, LedgerEvent, RecordId, RecordStore,
};
use unseal_ledger::InMemoryLedger;
use unseal_worker::{
    AccessPolicy, AllowAll, Allowlist, DecryptorWorker, Keystore, MirrorEngine, StatsSnapshot,
    WorkerConfig, WorkerStats,
};

/// Unseal - Access-Controlled Decryption
#[derive(Parser)]
#[command(name = "unseal")]
#[command(about = "Record ledger with a single appointed decryptor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory
    #[arg(short, long, default_value = "~/.unseal")]
    data_dir: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a ledger with a live worker and an interactive prompt
    Serve {
        /// Honor decryption requests only from these identities (hex, repeatable)
        #[arg(long = "allow", value_name = "HEX64")]
        allow: Vec<String>,
    },
    /// Generate (or show) the decryptor identity for the data directory
    Keygen,
    /// Demo mode: scripted store / request / rotate walkthrough
    Demo,
}

fn get_data_dir(path: &str) -> PathBuf {
    if path.starts_with("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(&path[2..]);
    }
    PathBuf::from(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("unseal=info".parse().unwrap())
                .add_directive("unseal_worker=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = get_data_dir(&cli.data_dir);

    match cli.command {
        Commands::Serve { allow } => cmd_serve(&data_dir, &allow).await,
        Commands::Keygen => cmd_keygen(&data_dir),
        Commands::Demo => cmd_demo().await,
    }
}

fn cmd_keygen(data_dir: &Path) -> Result<()> {
    let keystore = Keystore::new(data_dir);
    let existed = keystore.exists();
    let keypair = keystore
        .load_or_generate()
        .context("Failed to open the keystore")?;

    if existed {
        println!(
            "{} {}",
            "Existing decryptor identity:".green(),
            keypair.identity()
        );
    } else {
        println!(
            "{} {}",
            "Generated decryptor identity:".green(),
            keypair.identity()
        );
    }
    println!("{} {}", "Key file:".dimmed(), keystore.key_path().display());
    Ok(())
}

async fn cmd_serve(data_dir: &Path, allow: &[String]) -> Result<()> {
    let keystore = Keystore::new(data_dir);
    let keypair = keystore
        .load_or_generate()
        .context("Failed to open the keystore")?;
    let decryptor = keypair.identity();

    // The interactive session acts as the ledger owner, so every command
    // typed at the prompt is issued under this identity.
    let operator = Keypair::generate().identity();
    let ledger = Arc::new(InMemoryLedger::new(operator, decryptor));

    // Environment overrides first, then the explicit flag wins.
    let mut config = WorkerConfig::from_env();
    config.data_dir = data_dir.to_path_buf();
    let policy = build_policy(allow)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let worker = DecryptorWorker::new(
        decryptor,
        Arc::clone(&ledger),
        Arc::new(MirrorEngine),
        policy,
        config,
        shutdown_rx,
    );
    let stats = worker.stats();
    let handle = worker.spawn();
    info!(identity = %decryptor.short(), "decryptor online");

    // Mirror every accepted event onto the terminal as it lands.
    let mut feed = ledger.subscribe();
    tokio::spawn(async move {
        while let Some(record) = next_event(&mut feed).await {
            println!(
                "{} {}",
                format!("[{:>3}]", record.seq).dimmed(),
                describe_event(&record.event)
            );
        }
    });

    let policy_line = if allow.is_empty() {
        "allow all requesters".to_string()
    } else {
        format!("allowlist ({} identities)", allow.len())
    };
    println!("{}", "Unseal serve".bold());
    println!("  {} {}", "owner    ".dimmed(), operator.to_string().cyan());
    println!("  {} {}", "decryptor".dimmed(), decryptor.to_string().cyan());
    println!("  {} {}", "policy   ".dimmed(), policy_line);
    println!();
    print_serve_help();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", ">".green());
        stdout.flush()?;

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        match parts.as_slice() {
            ["quit"] | ["exit"] | ["q"] => break,
            ["help"] | ["?"] => print_serve_help(),
            ["store", id, blob] => {
                let Some(id) = parse_record_id(id) else {
                    println!("{}", "record id must be a number".red());
                    continue;
                };
                match hex::decode(blob) {
                    Ok(ciphertext) => {
                        if let Err(err) = ledger.store_ciphertext(operator, id, ciphertext).await {
                            println!("{}", err.to_string().red());
                        }
                    }
                    Err(_) => println!("{}", "ciphertext must be hex".red()),
                }
            }
            ["request", id] => {
                let Some(id) = parse_record_id(id) else {
                    println!("{}", "record id must be a number".red());
                    continue;
                };
                if let Err(err) = ledger.request_decryption(operator, id).await {
                    println!("{}", err.to_string().red());
                }
            }
            ["cipher", id] => {
                let Some(id) = parse_record_id(id) else {
                    println!("{}", "record id must be a number".red());
                    continue;
                };
                match ledger.ciphertext(id).await {
                    Ok(Some(bytes)) => println!("{}", hex::encode(bytes)),
                    Ok(None) => println!("{}", "no such record".dimmed()),
                    Err(err) => println!("{}", err.to_string().red()),
                }
            }
            ["result", id] => {
                let Some(id) = parse_record_id(id) else {
                    println!("{}", "record id must be a number".red());
                    continue;
                };
                match ledger.decryption_result(id).await {
                    Ok(Some(result)) => println!(
                        "{} (by {} at {})",
                        String::from_utf8_lossy(&result.plaintext).green(),
                        result.submitted_by.short(),
                        result.submitted_at.format("%H:%M:%S")
                    ),
                    Ok(None) => println!("{}", "not decrypted yet".dimmed()),
                    Err(err) => println!("{}", err.to_string().red()),
                }
            }
            ["rotate", hex_id] => {
                let Some(new_decryptor) = Identity::from_hex(hex_id) else {
                    println!("{}", "expected a 64-character hex identity".red());
                    continue;
                };
                if let Err(err) = ledger.set_decryptor(operator, new_decryptor).await {
                    println!("{}", err.to_string().red());
                }
            }
            ["authority"] => match ledger.authority().await {
                Ok(authority) => {
                    println!("  {} {}", "owner    ".dimmed(), authority.owner);
                    println!("  {} {}", "decryptor".dimmed(), authority.decryptor);
                    println!("  {} {}", "epoch    ".dimmed(), authority.epoch);
                }
                Err(err) => println!("{}", err.to_string().red()),
            },
            ["log"] => print_log(&ledger, 0).await,
            ["log", seq] => match seq.parse::<u64>() {
                Ok(after) => print_log(&ledger, after).await,
                Err(_) => println!("{}", "sequence must be a number".red()),
            },
            ["stats"] => {
                let snapshot = stats.snapshot();
                println!(
                    "  seen {}  served {}  denied {}  skipped {}  failed {}",
                    snapshot.requests_seen,
                    snapshot.submitted,
                    snapshot.denied,
                    snapshot.skipped,
                    snapshot.failed
                );
            }
            _ => println!("{}", "unknown command; try 'help'".red()),
        }
    }

    let _ = shutdown_tx.send(());
    let _ = handle.await;
    println!("{}", "Goodbye!".dimmed());
    Ok(())
}

async fn cmd_demo() -> Result<()> {
    println!("{}", "═".repeat(56).cyan());
    println!("{}", "  Unseal Demo".cyan().bold());
    println!("{}", "═".repeat(56).cyan());
    println!();

    // Parties for the walkthrough. Alice is cleared by the worker's
    // policy; Bob is not.
    let owner = Keypair::generate().identity();
    let alice = Keypair::generate().identity();
    let bob = Keypair::generate().identity();
    let worker_id = Keypair::generate().identity();

    let ledger = Arc::new(InMemoryLedger::new(owner, worker_id));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let worker = DecryptorWorker::new(
        worker_id,
        Arc::clone(&ledger),
        Arc::new(MirrorEngine),
        Arc::new(Allowlist::new([alice])),
        WorkerConfig::default(),
        shutdown_rx,
    );
    let stats = worker.stats();
    let handle = worker.spawn();

    println!("  {} {}", "owner    ".dimmed(), owner.short().cyan());
    println!("  {} {}", "decryptor".dimmed(), worker_id.short().cyan());
    println!("  {} {}", "alice    ".dimmed(), alice.short().cyan());
    println!("  {} {}", "bob      ".dimmed(), bob.short().cyan());
    println!();

    println!("{}", "1. The owner stores a sealed record.".bold());
    let id = RecordId(1);
    ledger
        .store_ciphertext(owner, id, MirrorEngine::seal(b"salary:1000"))
        .await?;
    let stored = ledger.ciphertext(id).await?.map(|c| c.len()).unwrap_or(0);
    println!("   record {} holds {} sealed bytes", id, stored);
    tokio::time::sleep(Duration::from_millis(400)).await;

    println!();
    println!("{}", "2. Alice asks for it; the worker answers.".bold());
    ledger.request_decryption(alice, id).await?;
    let result = wait_for_result(&ledger, id).await?;
    println!(
        "   plaintext: {}",
        String::from_utf8_lossy(&result.plaintext).green()
    );
    tokio::time::sleep(Duration::from_millis(400)).await;

    println!();
    println!("{}", "3. Bob tries to publish a result himself.".bold());
    match ledger.submit_result(bob, id, b"forged".to_vec()).await {
        Err(err) => println!("   rejected: {}", err.to_string().red()),
        Ok(()) => println!("   {}", "unexpectedly accepted".red().bold()),
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    println!();
    println!("{}", "4. Bob asks for a record he is not cleared for.".bold());
    let private_id = RecordId(2);
    ledger
        .store_ciphertext(owner, private_id, MirrorEngine::seal(b"for alice only"))
        .await?;
    ledger.request_decryption(bob, private_id).await?;
    wait_for_stat(&stats, |s| s.denied, 1).await?;
    if ledger.decryption_result(private_id).await?.is_none() {
        println!("   denied by policy; the record stays sealed");
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    // Retire the first worker before handing the role over.
    let _ = shutdown_tx.send(());
    let _ = handle.await;

    println!();
    println!("{}", "5. The owner appoints a new decryptor.".bold());
    let successor_id = Keypair::generate().identity();
    let (successor_shutdown, successor_rx) = broadcast::channel(1);
    // The successor picks up at the current log position rather than
    // replaying requests its predecessor already settled.
    let resume = ledger.event_count().await;
    let successor = DecryptorWorker::new(
        successor_id,
        Arc::clone(&ledger),
        Arc::new(MirrorEngine),
        Arc::new(AllowAll),
        WorkerConfig::default().with_resume_from(resume),
        successor_rx,
    );
    let successor_stats = successor.stats();
    let successor_handle = successor.spawn();

    ledger.set_decryptor(owner, successor_id).await?;
    let authority = ledger.authority().await?;
    println!(
        "   decryptor is now {} (epoch {})",
        successor_id.short().cyan(),
        authority.epoch
    );

    let rotated_id = RecordId(3);
    ledger
        .store_ciphertext(owner, rotated_id, MirrorEngine::seal(b"quarterly numbers"))
        .await?;
    ledger.request_decryption(alice, rotated_id).await?;
    let result = wait_for_result(&ledger, rotated_id).await?;
    println!(
        "   plaintext: {} (submitted by {})",
        String::from_utf8_lossy(&result.plaintext).green(),
        result.submitted_by.short().cyan()
    );

    let _ = successor_shutdown.send(());
    let _ = successor_handle.await;

    println!();
    println!("{}", "═".repeat(56).cyan());
    let first = stats.snapshot();
    let second = successor_stats.snapshot();
    println!(
        "Worker one: {} served, {} denied, {} skipped, {} failed",
        first.submitted, first.denied, first.skipped, first.failed
    );
    println!(
        "Worker two: {} served, {} denied, {} skipped, {} failed",
        second.submitted, second.denied, second.skipped, second.failed
    );

    let log = ledger.events_since(0).await?;
    println!("Ledger log: {} events", log.len());
    for record in &log {
        println!("  {:>3}  {}", record.seq, describe_event(&record.event));
    }

    println!();
    println!("{}", "Demo complete!".green().bold());
    Ok(())
}

/// Poll until a result for `id` lands on the ledger.
async fn wait_for_result(ledger: &InMemoryLedger, id: RecordId) -> Result<DecryptionResult> {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Some(result) = ledger.decryption_result(id).await? {
                return Ok(result);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .context("no result appeared within five seconds")?
}

/// Poll the worker counters until `field` reaches `at_least`.
async fn wait_for_stat(
    stats: &WorkerStats,
    field: fn(&StatsSnapshot) -> u64,
    at_least: u64,
) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while field(&stats.snapshot()) < at_least {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .context("the worker did not catch up within five seconds")
}

/// Receive the next live event, riding out any feed lag.
async fn next_event(feed: &mut broadcast::Receiver<EventRecord>) -> Option<EventRecord> {
    loop {
        match feed.recv().await {
            Ok(record) => return Some(record),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Build the worker's access policy for a serve session: an allowlist when
/// identities were given on the command line, otherwise open.
fn build_policy(allow: &[String]) -> Result<Arc<dyn AccessPolicy>> {
    if allow.is_empty() {
        return Ok(Arc::new(AllowAll));
    }
    let mut parties = Vec::with_capacity(allow.len());
    for raw in allow {
        let party = Identity::from_hex(raw)
            .with_context(|| format!("Invalid identity in --allow: {raw}"))?;
        parties.push(party);
    }
    Ok(Arc::new(Allowlist::new(parties)))
}

async fn print_log(ledger: &InMemoryLedger, after: u64) {
    match ledger.events_since(after).await {
        Ok(events) if events.is_empty() => println!("{}", "no events".dimmed()),
        Ok(events) => {
            for record in events {
                println!("  {:>3}  {}", record.seq, describe_event(&record.event));
            }
        }
        Err(err) => println!("{}", err.to_string().red()),
    }
}

fn describe_event(event: &LedgerEvent) -> String {
    match event {
        LedgerEvent::CipherStored { id, submitter } => {
            format!("cipher stored     id={} by={}", id, submitter.short())
        }
        LedgerEvent::DecryptionRequested { id, requester } => {
            format!("decryption asked  id={} by={}", id, requester.short())
        }
        LedgerEvent::DecryptionSubmitted {
            id,
            plaintext,
            submitter,
        } => {
            format!(
                "result published  id={} by={} ({} bytes)",
                id,
                submitter.short(),
                plaintext.len()
            )
        }
        LedgerEvent::DecryptorUpdated { old, new } => {
            format!("decryptor rotated {} -> {}", old.short(), new.short())
        }
    }
}

fn parse_record_id(raw: &str) -> Option<RecordId> {
    raw.parse::<u64>().ok().map(RecordId)
}

fn print_serve_help() {
    println!("{}", "Commands:".yellow());
    println!(
        "  {}   store a hex ciphertext under a record id",
        "store <id> <hex>".green()
    );
    println!(
        "  {}       ask the decryptor to open a record",
        "request <id>".green()
    );
    println!(
        "  {}        show the stored ciphertext",
        "cipher <id>".green()
    );
    println!(
        "  {}        show the published plaintext",
        "result <id>".green()
    );
    println!(
        "  {}     appoint a new decryptor (owner only)",
        "rotate <hex64>".green()
    );
    println!(
        "  {}          show owner, decryptor, and epoch",
        "authority".green()
    );
    println!(
        "  {}          print the event log from a sequence",
        "log [seq]".green()
    );
    println!("  {}              worker counters", "stats".green());
    println!("  {}               leave", "quit".green());
    println!();
}
