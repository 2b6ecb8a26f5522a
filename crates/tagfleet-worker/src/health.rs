//! Background health-frame writer: the worker's half of the `HEALTH|`
//! protocol defined in `tagfleet_supervisor::frame`.
//!
//! Grounded on `worker_discovery_comp.py`'s `_health_writer_loop`: a
//! background task that emits the current status every 5 seconds, sleeping
//! in 100ms increments so a shutdown request is noticed promptly rather than
//! only at the next 5-second boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tagfleet_supervisor::HealthFrame;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

const FRAME_INTERVAL: Duration = Duration::from_secs(5);
const POLL_GRANULARITY: Duration = Duration::from_millis(100);

/// Owns the worker's current health frame and a background task that writes
/// it to a pipe every 5 seconds. `set_frame` updates what the next tick
/// sends; it does not write immediately.
pub struct HealthReporter {
    frame: Arc<Mutex<HealthFrame>>,
    stop: Arc<AtomicBool>,
}

impl HealthReporter {
    /// Starts emitting `status="pending"` frames, matching the reference's
    /// initial health-writer state before the preflight check completes.
    /// The monitor ignores any status other than `healthy`/`recovering`, so
    /// this is inert until `set_frame` is called with one of those.
    #[must_use]
    pub fn new(component_id: impl Into<String>) -> Self {
        let frame = HealthFrame {
            component_id: component_id.into(),
            status: "pending".to_string(),
            recover_for_s: None,
        };
        Self {
            frame: Arc::new(Mutex::new(frame)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_frame(&self, frame: HealthFrame) {
        *self.frame.lock().unwrap() = frame;
    }

    /// Start writing the current frame to `out` every 5 seconds until
    /// `stop()` is called. The caller should `.await` the returned handle
    /// after stopping so the final frame (if any) flushes before the pipe
    /// is closed.
    pub fn spawn_writer<W>(&self, mut out: W) -> JoinHandle<()>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let frame = Arc::clone(&self.frame);
        let stop = Arc::clone(&self.stop);
        tokio::spawn(async move {
            loop {
                let line = {
                    let current = frame.lock().unwrap().clone();
                    format!("{}\n", current.encode())
                };
                if out.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if out.flush().await.is_err() {
                    break;
                }

                let mut waited = Duration::ZERO;
                while waited < FRAME_INTERVAL {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    tokio::time::sleep(POLL_GRANULARITY).await;
                    waited += POLL_GRANULARITY;
                }
            }
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writer_emits_current_frame_then_stops_promptly() {
        let reporter = HealthReporter::new("worker:tag:0");
        let (mut reader, writer) = tokio::io::duplex(4096);
        let handle = reporter.spawn_writer(writer);

        use tokio::io::AsyncReadExt;
        let mut buf = vec![0u8; 256];
        let n = reader.read(&mut buf).await.unwrap();
        let line = String::from_utf8_lossy(&buf[..n]);
        assert!(line.starts_with("HEALTH|"));
        assert!(line.contains("\"status\":\"pending\""));

        reporter.stop();
        tokio::time::timeout(Duration::from_millis(500), handle).await.unwrap().unwrap();
    }
}
