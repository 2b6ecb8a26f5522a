//! `FileProcessor`: the injection seam for whatever actually tags a file.
//!
//! The reference implementation's `DiscoveryWorker` holds a concrete
//! ML-backend-specific processor constructed eagerly at worker startup
//! (`worker_discovery_comp.py`'s `self.processor`). Loading real models and
//! running inference is out of scope here (§1 Non-goals), so this crate
//! defines the trait boundary the reference crosses and ships a stub
//! implementation behind it. A production deployment swaps in a real
//! implementation; the discover/claim/process/release loop around it does
//! not change.

use anyhow::Result;

/// Readiness check plus the actual per-file work. Both are synchronous —
/// callers that may block for a long time (model inference) are expected to
/// run through `tokio::task::spawn_blocking`.
pub trait FileProcessor: Send + Sync {
    /// Verified once at worker startup. `false` means the backend could not
    /// be reached (missing weights, no accelerator, etc.) and the worker
    /// should report unhealthy and exit rather than enter the main loop.
    fn is_ready(&self) -> bool;

    /// Tag one file. `Err` is treated as a processing failure: the claim is
    /// released and the file becomes re-discoverable.
    fn process_file(&self, file_id: &str) -> Result<()>;
}

/// Always-ready, always-succeeds stand-in for the real ML backend. Used when
/// no other `FileProcessor` is configured.
pub struct StubFileProcessor;

impl FileProcessor for StubFileProcessor {
    fn is_ready(&self) -> bool {
        true
    }

    fn process_file(&self, _file_id: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_processor_is_always_ready_and_succeeds() {
        let processor = StubFileProcessor;
        assert!(processor.is_ready());
        assert!(processor.process_file("file-1").is_ok());
    }
}
