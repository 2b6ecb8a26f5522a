//! Capacity estimate types shared between the capacity probe and the tier
//! planner.

use serde::{Deserialize, Serialize};

/// Fallback VRAM estimate (MB) used when the probe fails or times out.
pub const CONSERVATIVE_BACKBONE_VRAM_MB: u64 = 8192;

/// Fallback RAM estimate (MB) used when the probe fails or times out.
pub const CONSERVATIVE_WORKER_RAM_MB: u64 = 4096;

/// Result of a one-shot per-model capacity measurement. Immutable once
/// persisted under its `model_set_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityEstimate {
    pub model_set_hash: String,
    pub measured_backbone_vram_mb: u64,
    pub estimated_worker_ram_mb: u64,
    pub gpu_capable: bool,
    pub is_conservative: bool,
}

impl CapacityEstimate {
    /// Build the fallback estimate used when a probe fails, times out, or a
    /// waiter gives up on `_wait_for_probe_completion`.
    #[must_use]
    pub fn conservative(model_set_hash: impl Into<String>, gpu_capable: bool) -> Self {
        Self {
            model_set_hash: model_set_hash.into(),
            measured_backbone_vram_mb: if gpu_capable { CONSERVATIVE_BACKBONE_VRAM_MB } else { 0 },
            estimated_worker_ram_mb: CONSERVATIVE_WORKER_RAM_MB,
            gpu_capable,
            is_conservative: true,
        }
    }
}
