//! `ResourceProbe`: the single owner of the process's GPU-capability and
//! telemetry caches.
//!
//! The reference implementation keeps these as module-level mutable
//! globals (a `_gpu_capable_cache` variable, a TTL dict keyed by probe
//! name). That pattern doesn't translate cleanly to Rust — ownership of
//! mutable statics has to go through interior mutability regardless, so we
//! may as well make the cache an explicit, constructable type instead of a
//! second hidden global. Callers construct one `ResourceProbe` per process
//! (or share an `Arc<ResourceProbe>`) and get the same "capability is
//! permanent, telemetry is TTL'd" behavior the original had.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::OnceCell;

use crate::gpu::{self, VramUsage};
use crate::ram::{self, RamUsage};
use tagfleet_core::config::RamDetectionMode;

const TELEMETRY_TTL: Duration = Duration::from_secs(1);

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

/// Owns GPU-capability caching (permanent, set once) and VRAM/RAM telemetry
/// caching (1-second TTL), mirroring `resource_monitor_comp.py`'s caches
/// under one process-wide instance.
pub struct ResourceProbe {
    gpu_capable: OnceCell<bool>,
    vram: Mutex<Option<Cached<VramUsage>>>,
    ram: Mutex<Option<Cached<RamUsage>>>,
}

impl Default for ResourceProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gpu_capable: OnceCell::new(),
            vram: Mutex::new(None),
            ram: Mutex::new(None),
        }
    }

    /// Cached for the lifetime of this probe instance; never re-executes
    /// `nvidia-smi` once resolved.
    pub async fn check_gpu_capability(&self) -> bool {
        *self
            .gpu_capable
            .get_or_init(|| gpu::check_gpu_capability())
            .await
    }

    /// Sums VRAM used/total across all GPUs, refreshed at most once per
    /// second. Returns the last good value (or a zeroed one) on failure.
    pub async fn get_vram_usage_mb(&self) -> VramUsage {
        if let Some(cached) = self.fresh_vram() {
            return cached;
        }
        let usage = gpu::get_vram_usage_mb().await.unwrap_or(VramUsage {
            used_mb: 0,
            total_mb: 0,
        });
        *self.vram.lock().unwrap() = Some(Cached {
            value: usage,
            fetched_at: Instant::now(),
        });
        usage
    }

    fn fresh_vram(&self) -> Option<VramUsage> {
        let guard = self.vram.lock().unwrap();
        guard.as_ref().and_then(|c| {
            (c.fetched_at.elapsed() < TELEMETRY_TTL).then_some(c.value)
        })
    }

    /// RSS + available-memory snapshot under `mode`, refreshed at most once
    /// per second.
    pub fn get_ram_usage_mb(&self, mode: RamDetectionMode) -> RamUsage {
        if let Some(cached) = self.fresh_ram() {
            return cached;
        }
        let usage = ram::get_ram_usage_mb(mode);
        *self.ram.lock().unwrap() = Some(Cached {
            value: usage.clone(),
            fetched_at: Instant::now(),
        });
        usage
    }

    fn fresh_ram(&self) -> Option<RamUsage> {
        let guard = self.ram.lock().unwrap();
        guard.as_ref().and_then(|c| {
            (c.fetched_at.elapsed() < TELEMETRY_TTL).then(|| c.value.clone())
        })
    }

    /// Not cached: this is a point-in-time query scoped to a single pid,
    /// used only during capacity probing.
    pub async fn get_vram_usage_for_pid_mb(&self, pid: u32) -> u64 {
        gpu::get_vram_usage_for_pid_mb(pid).await
    }
}
