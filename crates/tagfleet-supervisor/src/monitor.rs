//! Health Monitor: a single consolidated reactor that polls every
//! registered component's health pipe, tracks per-component status via
//! [`tagfleet_core::health::ComponentState`], and dispatches status-change
//! callbacks to a [`ComponentLifecycleHandler`].
//!
//! The reference implementation polls N `multiprocessing` pipes from one
//! OS thread via `multiprocessing.connection.wait()` (an `epoll`/`select`
//! equivalent). The idiomatic async translation is one reader task per
//! pipe forwarding parsed frames into a single `mpsc` channel, drained by
//! one reactor task — functionally the same "single consolidated monitor",
//! implemented with async tasks instead of raw fd multiplexing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tagfleet_core::health::{ComponentPolicy, ComponentState, ComponentStatus, StatusChange};
use tagfleet_store::Store;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

use crate::frame::parse_frame;

/// How often the reactor checks startup/staleness/recovery deadlines.
/// Matches the reference's "once per ~1 second" cadence.
const STALENESS_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// How often the best-effort history snapshot is written to the store.
const HISTORY_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

#[must_use]
pub fn now_wall_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Context delivered alongside a status-change callback. A superset of
/// [`StatusChange`] that also carries the pre-clamp `recover_for_s` the
/// worker actually reported, since domain handlers occasionally want to
/// distinguish "requested max" from "requested nothing".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusChangeContext {
    pub old: ComponentStatus,
    pub new: ComponentStatus,
    pub consecutive_misses: u32,
    pub recovery_deadline_ms: Option<u64>,
    pub reported_recover_for_s: Option<f64>,
}

impl StatusChangeContext {
    fn from_change(change: StatusChange, reported_recover_for_s: Option<f64>) -> Self {
        Self {
            old: change.old,
            new: change.new,
            consecutive_misses: change.consecutive_misses,
            recovery_deadline_ms: change.recovery_deadline_ms,
            reported_recover_for_s,
        }
    }
}

/// Receives status-change callbacks from the Health Monitor. Implementations
/// decide what to do (restart, mark failed, log) — the monitor itself never
/// makes that call. Dispatched synchronously from the reactor task, outside
/// any registry lock; implementations that need to do async work (spawn a
/// restart, write to the store) should `tokio::spawn` it rather than block.
pub trait ComponentLifecycleHandler: Send + Sync {
    fn on_status_change(&self, component_id: &str, ctx: StatusChangeContext);
}

enum PipeEvent {
    Frame { component_id: String, frame: crate::frame::HealthFrame },
    Eof { component_id: String },
}

struct Registration {
    state: ComponentState,
    reader: JoinHandle<()>,
}

pub struct HealthMonitor {
    registry: Mutex<HashMap<String, Registration>>,
    events_tx: mpsc::UnboundedSender<PipeEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PipeEvent>>>,
    handler: Arc<dyn ComponentLifecycleHandler>,
    store: Option<Arc<StdMutex<Store>>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(handler: Arc<dyn ComponentLifecycleHandler>, store: Option<Arc<StdMutex<Store>>>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            registry: Mutex::new(HashMap::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            handler,
            store,
        }
    }

    /// Register a component for monitoring. Rejects (logs, ignores)
    /// re-registration of a component id that is currently `failed` — a
    /// failed id stays reserved.
    pub async fn register_component<R>(&self, component_id: impl Into<String>, policy: ComponentPolicy, pipe: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let component_id = component_id.into();
        let mut registry = self.registry.lock().await;

        if let Some(existing) = registry.get(&component_id) {
            if existing.state.status == ComponentStatus::Failed {
                tracing::warn!(component_id, "refusing to re-register failed component");
                return;
            }
        }

        let reader = spawn_reader(component_id.clone(), pipe, self.events_tx.clone());
        let state = ComponentState::register(now_wall_ms(), policy);
        registry.insert(component_id, Registration { state, reader });
    }

    /// Unregister a component, aborting its reader task. Does not emit a
    /// callback — used for graceful shutdown where the supervisor already
    /// knows it's tearing the component down.
    pub async fn unregister_component(&self, component_id: &str) {
        if let Some(registration) = self.registry.lock().await.remove(component_id) {
            registration.reader.abort();
        }
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let component_id = component_id.to_string();
            let _ = tokio::task::spawn_blocking(move || store.lock().unwrap().remove_heartbeat(&component_id)).await;
        }
    }

    pub async fn get_status(&self, component_id: &str) -> Option<ComponentStatus> {
        self.registry.lock().await.get(component_id).map(|r| r.state.status)
    }

    pub async fn get_all_statuses(&self) -> HashMap<String, ComponentStatus> {
        self.registry
            .lock()
            .await
            .iter()
            .map(|(id, r)| (id.clone(), r.state.status))
            .collect()
    }

    /// Idempotent terminal transition, called by the domain (the worker
    /// supervisor) once it decides a component should never restart.
    pub async fn set_failed(&self, component_id: &str) {
        let change = {
            let mut registry = self.registry.lock().await;
            let Some(registration) = registry.get_mut(component_id) else {
                return;
            };
            registration.state.set_failed()
        };
        if let Some(change) = change {
            self.emit(component_id, change, None).await;
        }
    }

    /// Run the reactor: drains the pipe-event channel and runs the
    /// periodic deadline check, forever. Intended to be spawned as one
    /// long-lived task; stops if the channel closes (all registrations
    /// dropped) or the process shuts down.
    pub async fn run(&self) {
        let mut events_rx = self
            .events_rx
            .lock()
            .await
            .take()
            .expect("HealthMonitor::run called more than once");

        let mut staleness_ticker = interval(STALENESS_CHECK_INTERVAL);
        let mut history_ticker = interval(HISTORY_SNAPSHOT_INTERVAL);

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    match event {
                        Some(PipeEvent::Frame { component_id, frame }) => {
                            self.handle_frame(component_id, frame).await;
                        }
                        Some(PipeEvent::Eof { component_id }) => {
                            self.handle_eof(component_id).await;
                        }
                        None => break,
                    }
                }
                _ = staleness_ticker.tick() => {
                    self.check_all_deadlines().await;
                }
                _ = history_ticker.tick() => {
                    self.write_history_snapshot().await;
                }
            }
        }
    }

    async fn handle_frame(&self, component_id: String, frame: crate::frame::HealthFrame) {
        let now = now_wall_ms();
        let change = {
            let mut registry = self.registry.lock().await;
            let Some(registration) = registry.get_mut(&component_id) else {
                return;
            };
            match frame.status.as_str() {
                "healthy" => registration.state.on_healthy_frame(now),
                "recovering" => registration.state.on_recovering_frame(now, frame.recover_for_s),
                _ => None,
            }
        };
        if let Some(change) = change {
            self.emit(&component_id, change, frame.recover_for_s).await;
        }
    }

    async fn handle_eof(&self, component_id: String) {
        let change = {
            let mut registry = self.registry.lock().await;
            let Some(registration) = registry.get_mut(&component_id) else {
                return;
            };
            registration.state.on_eof()
        };
        if let Some(change) = change {
            self.emit(&component_id, change, None).await;
        }
    }

    async fn check_all_deadlines(&self) {
        let now = now_wall_ms();
        let changes: Vec<(String, StatusChange)> = {
            let mut registry = self.registry.lock().await;
            registry
                .iter_mut()
                .filter(|(_, r)| !matches!(r.state.status, ComponentStatus::Dead | ComponentStatus::Failed))
                .filter_map(|(id, r)| r.state.check_deadline(now).map(|change| (id.clone(), change)))
                .collect()
        };
        for (component_id, change) in changes {
            self.emit(&component_id, change, None).await;
        }
    }

    async fn emit(&self, component_id: &str, change: StatusChange, reported_recover_for_s: Option<f64>) {
        let ctx = StatusChangeContext::from_change(change, reported_recover_for_s);
        self.handler.on_status_change(component_id, ctx);
    }

    /// Best-effort periodic write of current statuses to the history table.
    /// Never affects health decisions; failures are logged at debug.
    async fn write_history_snapshot(&self) {
        let Some(store) = &self.store else { return };
        let snapshot: Vec<(String, ComponentStatus)> = {
            let registry = self.registry.lock().await;
            registry.iter().map(|(id, r)| (id.clone(), r.state.status)).collect()
        };
        let store = Arc::clone(store);
        let now = now_wall_ms() as i64;
        let result = tokio::task::spawn_blocking(move || {
            let store = store.lock().unwrap();
            for (component_id, status) in snapshot {
                if let Err(e) = store.append_health_history(&component_id, &status.to_string(), now) {
                    tracing::debug!(component_id, error = %e, "history write failed");
                }
            }
        })
        .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, "history snapshot task panicked");
        }
    }
}

fn spawn_reader<R>(component_id: String, pipe: R, events_tx: mpsc::UnboundedSender<PipeEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_frame(&line) {
                    Some(frame) => {
                        let _ = events_tx.send(PipeEvent::Frame {
                            component_id: component_id.clone(),
                            frame,
                        });
                    }
                    None => {
                        tracing::warn!(component_id, %line, "dropped malformed HEALTH frame");
                    }
                },
                Ok(None) => {
                    let _ = events_tx.send(PipeEvent::Eof { component_id: component_id.clone() });
                    break;
                }
                Err(e) => {
                    tracing::debug!(component_id, error = %e, "pipe read error, treating as EOF");
                    let _ = events_tx.send(PipeEvent::Eof { component_id: component_id.clone() });
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    struct RecordingHandler {
        events: StdMutex<Vec<(String, StatusChangeContext)>>,
        calls: AtomicUsize,
    }

    impl RecordingHandler {
        fn new() -> Self {
            Self {
                events: StdMutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ComponentLifecycleHandler for RecordingHandler {
        fn on_status_change(&self, component_id: &str, ctx: StatusChangeContext) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.events.lock().unwrap().push((component_id.to_string(), ctx));
        }
    }

    fn fast_policy() -> ComponentPolicy {
        ComponentPolicy {
            startup_timeout_s: 30,
            staleness_interval_s: 5,
            max_consecutive_misses: 3,
            min_recovery_s: 5,
            max_recovery_s: 60,
        }
    }

    #[tokio::test]
    async fn healthy_frame_transitions_pending_to_healthy() {
        let handler = Arc::new(RecordingHandler::new());
        let monitor = Arc::new(HealthMonitor::new(handler.clone(), None));

        let (mut writer, reader) = tokio::io::duplex(4096);
        monitor.register_component("worker:tag:0", fast_policy(), reader).await;

        let monitor_run = Arc::clone(&monitor);
        let run_handle = tokio::spawn(async move { monitor_run.run().await });

        writer
            .write_all(format!("{}\n", crate::frame::HealthFrame::healthy("worker:tag:0").encode()).as_bytes())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.get_status("worker:tag:0").await, Some(ComponentStatus::Healthy));

        let events = handler.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1.new, ComponentStatus::Healthy);
        drop(events);
        drop(writer);
        run_handle.abort();
    }

    #[tokio::test]
    async fn eof_transitions_to_dead() {
        let handler = Arc::new(RecordingHandler::new());
        let monitor = Arc::new(HealthMonitor::new(handler.clone(), None));

        let (writer, reader) = tokio::io::duplex(4096);
        monitor.register_component("worker:tag:0", fast_policy(), reader).await;

        let monitor_run = Arc::clone(&monitor);
        let run_handle = tokio::spawn(async move { monitor_run.run().await });

        drop(writer); // EOF

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.get_status("worker:tag:0").await, Some(ComponentStatus::Dead));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        run_handle.abort();
    }

    #[tokio::test]
    async fn set_failed_is_idempotent_and_terminal() {
        let handler = Arc::new(RecordingHandler::new());
        let monitor = HealthMonitor::new(handler.clone(), None);

        let (_writer, reader) = tokio::io::duplex(4096);
        monitor.register_component("worker:tag:0", fast_policy(), reader).await;

        monitor.set_failed("worker:tag:0").await;
        monitor.set_failed("worker:tag:0").await;

        assert_eq!(monitor.get_status("worker:tag:0").await, Some(ComponentStatus::Failed));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reregistering_a_failed_component_id_is_rejected() {
        let handler = Arc::new(RecordingHandler::new());
        let monitor = HealthMonitor::new(handler, None);

        let (_writer, reader) = tokio::io::duplex(4096);
        monitor.register_component("worker:tag:0", fast_policy(), reader).await;
        monitor.set_failed("worker:tag:0").await;

        let (_writer2, reader2) = tokio::io::duplex(4096);
        monitor.register_component("worker:tag:0", fast_policy(), reader2).await;

        // Still failed; registration did not reset it.
        assert_eq!(monitor.get_status("worker:tag:0").await, Some(ComponentStatus::Failed));
    }

    #[tokio::test]
    async fn malformed_frame_does_not_transition() {
        let handler = Arc::new(RecordingHandler::new());
        let monitor = Arc::new(HealthMonitor::new(handler.clone(), None));

        let (mut writer, reader) = tokio::io::duplex(4096);
        monitor.register_component("worker:tag:0", fast_policy(), reader).await;

        let monitor_run = Arc::clone(&monitor);
        let run_handle = tokio::spawn(async move { monitor_run.run().await });

        writer.write_all(b"not a health frame\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(monitor.get_status("worker:tag:0").await, Some(ComponentStatus::Pending));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);

        drop(writer);
        run_handle.abort();
    }
}
