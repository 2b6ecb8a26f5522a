//! Discovery worker subprocess entrypoint.
//!
//! Grounded on `original_source/nomarr/services/infrastructure/workers/
//! discovery_worker.py`'s `DiscoveryWorker.run`: start the health writer
//! first, verify the backend is ready, open a DB connection, then loop
//! discover → claim → process → release until told to stop or until too
//! many consecutive errors accumulate.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use clap::Parser;
use tagfleet_store::Store;
use tagfleet_supervisor::HealthFrame;

mod cli;
mod health;
mod processor;

use health::HealthReporter;
use processor::{FileProcessor, StubFileProcessor};

/// Idle sleep when there is no eligible file to claim.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Sleep after a failed preflight check, long enough for the health writer
/// to have emitted the unhealthy frame at least once.
const PREFLIGHT_FAILURE_SETTLE: Duration = Duration::from_secs(10);

/// Consecutive `process_file` failures before this worker gives up and
/// exits, letting the supervisor's restart policy take over.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("TAGFLEET_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(worker_id = %args.worker_id, tier = ?args.tier, "discovery worker starting");

    let reporter = HealthReporter::new(args.worker_id.clone());
    let writer_handle = reporter.spawn_writer(tokio::io::stdout());

    // Preflight: verify the ML backend is reachable before doing anything
    // else. A production deployment injects a real `FileProcessor`; this
    // crate ships only the stub (see `processor.rs`).
    let processor: Arc<dyn FileProcessor> = Arc::new(StubFileProcessor);
    if !processor.is_ready() {
        tracing::error!(worker_id = %args.worker_id, "ML backend not ready, reporting unhealthy and exiting");
        reporter.set_frame(unhealthy_frame(&args.worker_id));
        tokio::time::sleep(PREFLIGHT_FAILURE_SETTLE).await;
        reporter.stop();
        let _ = writer_handle.await;
        return Ok(());
    }

    let store = Arc::new(StdMutex::new(Store::open(std::path::Path::new(&args.db_path))?));

    record_history(&store, &args.worker_id, "starting").await;
    reporter.set_frame(HealthFrame::healthy(args.worker_id.clone()));
    record_history(&store, &args.worker_id, "healthy").await;

    run_main_loop(&args.worker_id, &store, processor.as_ref()).await;

    record_history(&store, &args.worker_id, "stopping").await;
    reporter.stop();
    let _ = writer_handle.await;

    // Dropping stdout here closes our write end; the parent's Health
    // Monitor observes EOF and transitions this component to dead.
    Ok(())
}

fn unhealthy_frame(worker_id: &str) -> HealthFrame {
    HealthFrame {
        component_id: worker_id.to_string(),
        status: "unhealthy".to_string(),
        recover_for_s: None,
    }
}

async fn record_history(store: &Arc<StdMutex<Store>>, worker_id: &str, status: &str) {
    let store = Arc::clone(store);
    let worker_id = worker_id.to_string();
    let status = status.to_string();
    let now = now_ms();
    let result = tokio::task::spawn_blocking(move || store.lock().unwrap().append_health_history(&worker_id, &status, now)).await;
    if let Err(e) = result {
        tracing::debug!(error = %e, "history write task panicked");
    }
}

/// Stop signal is this process's own stdin pipe: the supervisor closes its
/// end on shutdown, which we observe here as EOF. We poll it non-blockingly
/// between claim attempts rather than racing it against every await point,
/// since `tokio::process::ChildStdin`'s counterpart end being closed is the
/// only shutdown signal this subprocess has.
async fn stop_requested(stdin_closed: &Arc<std::sync::atomic::AtomicBool>) -> bool {
    stdin_closed.load(std::sync::atomic::Ordering::SeqCst)
}

async fn run_main_loop(worker_id: &str, store: &Arc<StdMutex<Store>>, processor: &dyn FileProcessor) {
    let stdin_closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let stdin_closed = Arc::clone(&stdin_closed);
        tokio::spawn(async move {
            let mut buf = [0u8; 1];
            use tokio::io::AsyncReadExt;
            let _ = tokio::io::stdin().read(&mut buf).await;
            stdin_closed.store(true, std::sync::atomic::Ordering::SeqCst);
        });
    }

    let mut consecutive_errors: u32 = 0;

    while !stop_requested(&stdin_closed).await {
        heartbeat(store, worker_id).await;

        let claimed = {
            let store = Arc::clone(store);
            let worker_id = worker_id.to_string();
            let now = now_ms();
            tokio::task::spawn_blocking(move || store.lock().unwrap().discover_and_claim_file(&worker_id, now)).await
        };

        let file_id = match claimed {
            Ok(Ok(Some(file_id))) => file_id,
            Ok(Ok(None)) => {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                continue;
            }
            Ok(Err(e)) => {
                tracing::warn!(%worker_id, error = %e, "discover_and_claim_file failed");
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                continue;
            }
            Err(e) => {
                tracing::warn!(%worker_id, error = %e, "discover_and_claim_file task panicked");
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                continue;
            }
        };

        let exists = {
            let store = Arc::clone(store);
            let file_id = file_id.clone();
            tokio::task::spawn_blocking(move || store.lock().unwrap().file_exists(&file_id)).await
        };
        if !matches!(exists, Ok(Ok(true))) {
            release_claim(store, &file_id).await;
            continue;
        }

        // `process_file` may block for a long time (model inference in a
        // real deployment); `block_in_place` runs it synchronously on this
        // worker thread without requiring `'static`, the way the teacher
        // wraps blocking tmux calls in `poll_loop::poll_tick`.
        let result = tokio::task::block_in_place(|| processor.process_file(&file_id));

        match result {
            Ok(()) => {
                let store_clone = Arc::clone(store);
                let file_id_clone = file_id.clone();
                let _ = tokio::task::spawn_blocking(move || store_clone.lock().unwrap().mark_file_tagged(&file_id_clone)).await;
                release_claim(store, &file_id).await;
                consecutive_errors = 0;
            }
            Err(e) => {
                tracing::warn!(%worker_id, %file_id, error = %e, "process_file failed");
                release_claim(store, &file_id).await;
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    tracing::error!(%worker_id, consecutive_errors, "too many consecutive errors, exiting");
                    break;
                }
            }
        }
    }
}

async fn heartbeat(store: &Arc<StdMutex<Store>>, worker_id: &str) {
    let store = Arc::clone(store);
    let worker_id = worker_id.to_string();
    let now = now_ms();
    let _ = tokio::task::spawn_blocking(move || store.lock().unwrap().record_heartbeat(&worker_id, now)).await;
}

async fn release_claim(store: &Arc<StdMutex<Store>>, file_id: &str) {
    let store = Arc::clone(store);
    let file_id = file_id.to_string();
    let _ = tokio::task::spawn_blocking(move || store.lock().unwrap().release_claim(&file_id)).await;
}
