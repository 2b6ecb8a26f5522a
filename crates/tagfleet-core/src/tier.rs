//! Execution tier selection for GPU/CPU adaptive resource management.
//!
//! Pure function: `(capacity estimate, budgets, config) -> TierDecision`.
//! Evaluated top-down; the first tier whose requirements fit wins. No IO,
//! no clock — deterministic given its inputs.

use crate::capacity::CapacityEstimate;

/// Minimum RAM (MB) required to run Tier 3 (CPU-only): one backbone plus
/// heads plus runtime overhead.
pub const MIN_RAM_FOR_CPU_ONLY_MB: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ExecutionTier {
    FastPath = 0,
    ReducedCache = 1,
    SequentialGpu = 2,
    SequentialCpu = 3,
    Refuse = 4,
}

impl std::fmt::Display for ExecutionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionTier::FastPath => "FAST_PATH",
            ExecutionTier::ReducedCache => "REDUCED_CACHE",
            ExecutionTier::SequentialGpu => "SEQUENTIAL_GPU",
            ExecutionTier::SequentialCpu => "SEQUENTIAL_CPU",
            ExecutionTier::Refuse => "REFUSE",
        };
        f.write_str(s)
    }
}

/// Static configuration for a tier: cache sizing and GPU preference. The
/// planner does not enforce these; workers read them to configure their own
/// inference runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierConfig {
    pub tier: ExecutionTier,
    pub max_workers: u32,
    pub backbone_cache_size: u32,
    pub head_cache_size: u32,
    pub prefer_gpu: bool,
    pub description: &'static str,
}

impl TierConfig {
    #[must_use]
    pub fn for_tier(tier: ExecutionTier) -> Self {
        match tier {
            ExecutionTier::FastPath => TierConfig {
                tier,
                max_workers: 4,
                backbone_cache_size: 2,
                head_cache_size: 24,
                prefer_gpu: true,
                description: "Fast Path: cached, multi-worker (2-3s/file)",
            },
            ExecutionTier::ReducedCache => TierConfig {
                tier,
                max_workers: 2,
                backbone_cache_size: 1,
                head_cache_size: 12,
                prefer_gpu: true,
                description: "Reduced Cache: smaller caches, fewer workers (3-5s/file)",
            },
            ExecutionTier::SequentialGpu => TierConfig {
                tier,
                max_workers: 1,
                backbone_cache_size: 0,
                head_cache_size: 0,
                prefer_gpu: true,
                description: "Sequential GPU: no cache, single worker (5-10s/file)",
            },
            ExecutionTier::SequentialCpu => TierConfig {
                tier,
                max_workers: 1,
                backbone_cache_size: 0,
                head_cache_size: 0,
                prefer_gpu: false,
                description: "Sequential CPU: backbone on CPU, single worker (30-60s/file)",
            },
            ExecutionTier::Refuse => TierConfig {
                tier,
                max_workers: 0,
                backbone_cache_size: 0,
                head_cache_size: 0,
                prefer_gpu: false,
                description: "Refuse: insufficient resources for any tier",
            },
        }
    }
}

/// Outcome of tier selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierDecision {
    pub tier: ExecutionTier,
    pub config: TierConfig,
    pub calculated_workers: u32,
    pub reason: String,
}

/// Select the highest-performance tier whose resource requirements fit
/// within the given budgets.
#[must_use]
pub fn select_execution_tier(
    estimate: &CapacityEstimate,
    vram_budget_mb: u64,
    ram_budget_mb: u64,
    config_max_workers: u32,
) -> TierDecision {
    let backbone_vram = estimate.measured_backbone_vram_mb;
    let worker_ram = estimate.estimated_worker_ram_mb;

    if !estimate.gpu_capable {
        return evaluate_cpu_only_tier(worker_ram, ram_budget_mb, config_max_workers);
    }

    if let Some(decision) = evaluate_tier_0(backbone_vram, worker_ram, vram_budget_mb, ram_budget_mb, config_max_workers) {
        return decision;
    }
    if let Some(decision) = evaluate_tier_1(backbone_vram, worker_ram, vram_budget_mb, ram_budget_mb, config_max_workers) {
        return decision;
    }
    if let Some(decision) = evaluate_tier_2(backbone_vram, worker_ram, vram_budget_mb, ram_budget_mb) {
        return decision;
    }
    evaluate_cpu_only_tier(worker_ram, ram_budget_mb, config_max_workers)
}

/// Bypass admission control entirely: `resource_management.enabled = false`
/// honors `worker_count` directly at Tier 0.
#[must_use]
pub fn fixed_fast_path(worker_count: u32) -> TierDecision {
    TierDecision {
        tier: ExecutionTier::FastPath,
        config: TierConfig::for_tier(ExecutionTier::FastPath),
        calculated_workers: worker_count,
        reason: "resource management disabled".to_string(),
    }
}

fn evaluate_tier_0(
    backbone_vram: u64,
    worker_ram: u64,
    vram_budget_mb: u64,
    ram_budget_mb: u64,
    config_max_workers: u32,
) -> Option<TierDecision> {
    let min_vram_for_tier = 2 * backbone_vram;
    if vram_budget_mb < min_vram_for_tier {
        return None;
    }

    let vram_workers = if backbone_vram > 0 { (vram_budget_mb / (2 * backbone_vram)) as u32 } else { config_max_workers };
    let ram_workers = if worker_ram > 0 { (ram_budget_mb / worker_ram) as u32 } else { config_max_workers };
    let calculated_workers = vram_workers.min(ram_workers).min(config_max_workers);

    if calculated_workers < 1 {
        return None;
    }

    Some(TierDecision {
        tier: ExecutionTier::FastPath,
        config: TierConfig::for_tier(ExecutionTier::FastPath),
        calculated_workers,
        reason: format!("Tier 0: {calculated_workers} workers (vram={vram_budget_mb}MB, ram={ram_budget_mb}MB)"),
    })
}

fn evaluate_tier_1(
    backbone_vram: u64,
    worker_ram: u64,
    vram_budget_mb: u64,
    ram_budget_mb: u64,
    config_max_workers: u32,
) -> Option<TierDecision> {
    if vram_budget_mb < backbone_vram {
        return None;
    }

    let config = TierConfig::for_tier(ExecutionTier::ReducedCache);
    let vram_workers = if backbone_vram > 0 { (vram_budget_mb / backbone_vram) as u32 } else { 2 };
    let ram_workers = if worker_ram > 0 { (ram_budget_mb / worker_ram) as u32 } else { 2 };
    let calculated_workers = vram_workers.min(ram_workers).min(config_max_workers).min(config.max_workers);

    if calculated_workers < 1 {
        return None;
    }

    Some(TierDecision {
        tier: ExecutionTier::ReducedCache,
        config,
        calculated_workers,
        reason: format!("Tier 1: {calculated_workers} workers (reduced cache)"),
    })
}

fn evaluate_tier_2(backbone_vram: u64, worker_ram: u64, vram_budget_mb: u64, ram_budget_mb: u64) -> Option<TierDecision> {
    if vram_budget_mb < backbone_vram || ram_budget_mb < worker_ram {
        return None;
    }

    Some(TierDecision {
        tier: ExecutionTier::SequentialGpu,
        config: TierConfig::for_tier(ExecutionTier::SequentialGpu),
        calculated_workers: 1,
        reason: "Tier 2: Sequential GPU (no cache, single worker)".to_string(),
    })
}

fn evaluate_cpu_only_tier(worker_ram: u64, ram_budget_mb: u64, _config_max_workers: u32) -> TierDecision {
    let min_ram_needed = worker_ram.max(MIN_RAM_FOR_CPU_ONLY_MB);

    if ram_budget_mb >= min_ram_needed {
        return TierDecision {
            tier: ExecutionTier::SequentialCpu,
            config: TierConfig::for_tier(ExecutionTier::SequentialCpu),
            calculated_workers: 1,
            reason: "Tier 3: Sequential CPU (backbone on CPU, single worker)".to_string(),
        };
    }

    TierDecision {
        tier: ExecutionTier::Refuse,
        config: TierConfig::for_tier(ExecutionTier::Refuse),
        calculated_workers: 0,
        reason: format!("Tier 4: Refuse (need {min_ram_needed}MB RAM, have {ram_budget_mb}MB)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimate(backbone_vram: u64, worker_ram: u64, gpu_capable: bool) -> CapacityEstimate {
        CapacityEstimate {
            model_set_hash: "deadbeefcafebabe".to_string(),
            measured_backbone_vram_mb: backbone_vram,
            estimated_worker_ram_mb: worker_ram,
            gpu_capable,
            is_conservative: false,
        }
    }

    #[test]
    fn scenario_one_admission_control_ample_resources() {
        let est = estimate(4000, 2000, true);
        let decision = select_execution_tier(&est, 24_000, 16_000, 4);
        assert_eq!(decision.tier, ExecutionTier::FastPath);
        assert_eq!(decision.calculated_workers, 3);
    }

    #[test]
    fn scenario_two_admission_control_refuse() {
        let est = estimate(0, 8000, false);
        let decision = select_execution_tier(&est, 0, 2000, 4);
        assert_eq!(decision.tier, ExecutionTier::Refuse);
        assert_eq!(decision.calculated_workers, 0);
    }

    #[test]
    fn vram_budget_zero_with_sufficient_ram_forces_tier_three() {
        let est = estimate(4000, 2000, true);
        let decision = select_execution_tier(&est, 0, 4096, 4);
        assert_eq!(decision.tier, ExecutionTier::SequentialCpu);
        assert_eq!(decision.calculated_workers, 1);
    }

    #[test]
    fn ram_budget_zero_always_refuses() {
        let est = estimate(1000, 1000, true);
        let decision = select_execution_tier(&est, 10_000, 0, 4);
        assert_eq!(decision.tier, ExecutionTier::Refuse);
        assert_eq!(decision.calculated_workers, 0);
    }

    #[test]
    fn gpu_incapable_skips_straight_to_tier_three() {
        let est = estimate(4000, 2000, false);
        let decision = select_execution_tier(&est, 100_000, 8192, 4);
        assert_eq!(decision.tier, ExecutionTier::SequentialCpu);
    }

    #[test]
    fn tier_decision_is_pure() {
        let est = estimate(4000, 2000, true);
        let a = select_execution_tier(&est, 24_000, 16_000, 4);
        let b = select_execution_tier(&est, 24_000, 16_000, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn reduced_cache_fits_when_fast_path_does_not() {
        let est = estimate(6000, 2000, true);
        let decision = select_execution_tier(&est, 7000, 4000, 4);
        assert_eq!(decision.tier, ExecutionTier::ReducedCache);
        assert_eq!(decision.calculated_workers, 1);
    }

    #[test]
    fn fixed_fast_path_bypasses_admission_control() {
        let decision = fixed_fast_path(6);
        assert_eq!(decision.tier, ExecutionTier::FastPath);
        assert_eq!(decision.calculated_workers, 6);
    }
}
