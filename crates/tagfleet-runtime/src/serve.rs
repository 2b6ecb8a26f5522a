//! `serve`: wires the Resource Probe, Store, Health Monitor, and Worker
//! Supervisor together and runs them until a shutdown signal arrives.
//!
//! Modeled on the teacher's `poll_loop::run_daemon`: build shared state once,
//! spawn the long-lived reactor, then `tokio::select!` over ctrl-c/SIGTERM
//! and drive a clean teardown.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use tagfleet_store::Store;
use tagfleet_supervisor::{ComponentLifecycleHandler, HealthMonitor, StatusChangeContext, WorkerSupervisor};
use tracing::info;

use crate::cli::ServeOpts;
use crate::config;

/// Forwards lifecycle callbacks to the `WorkerSupervisor` once it exists.
///
/// `HealthMonitor::new` takes its handler up front, but `WorkerSupervisor`
/// (the real handler) needs an already-constructed `Arc<HealthMonitor>` to
/// build itself. This slot breaks the cycle: the monitor is built against
/// it immediately, and the supervisor is plugged in right after — before
/// `HealthMonitor::run` starts delivering any callbacks.
struct HandlerSlot(OnceLock<Arc<WorkerSupervisor>>);

impl ComponentLifecycleHandler for HandlerSlot {
    fn on_status_change(&self, component_id: &str, ctx: StatusChangeContext) {
        if let Some(supervisor) = self.0.get() {
            supervisor.on_status_change(component_id, ctx);
        }
    }
}

fn default_worker_binary() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("runtime binary has no parent directory"))?;
    Ok(dir.join("tagfleet-worker"))
}

pub async fn run(opts: ServeOpts) -> anyhow::Result<()> {
    let config = config::from_serve_opts(&opts)?;
    let worker_binary = match &opts.worker_binary {
        Some(path) => PathBuf::from(path),
        None => default_worker_binary()?,
    };

    let store = Arc::new(StdMutex::new(Store::open(std::path::Path::new(&config.db_path))?));
    let resource_probe = Arc::new(tagfleet_probe::ResourceProbe::new());

    let handler_slot = Arc::new(HandlerSlot(OnceLock::new()));
    let monitor = Arc::new(HealthMonitor::new(handler_slot.clone(), Some(Arc::clone(&store))));
    let supervisor = WorkerSupervisor::new(config, worker_binary, Arc::clone(&store), Arc::clone(&monitor), resource_probe);
    handler_slot
        .0
        .set(Arc::clone(&supervisor))
        .unwrap_or_else(|_| unreachable!("handler slot set exactly once"));

    let monitor_for_run = Arc::clone(&monitor);
    let monitor_handle = tokio::spawn(async move { monitor_for_run.run().await });

    supervisor.start_all_workers().await?;
    info!("tagfleet supervisor serving");

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping workers");

    supervisor.stop_all_workers().await?;
    monitor_handle.abort();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
