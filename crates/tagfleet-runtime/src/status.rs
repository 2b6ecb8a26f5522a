//! `status`: a lightweight read path over the coordination database, not an
//! RPC server. The teacher's UDS JSON-RPC `server.rs` pattern is not reused
//! here since a query surface beyond "read the DB" is out of scope.

use serde::Serialize;
use tagfleet_core::tier::select_execution_tier;
use tagfleet_store::Store;

use crate::cli::StatusOpts;

#[derive(Serialize)]
struct StatusReport {
    model_set_hash: String,
    gpu_capable: Option<bool>,
    tier: Option<String>,
    calculated_workers: Option<u32>,
    reason: Option<String>,
    active_claims: i64,
    worker_statuses: Vec<WorkerStatusEntry>,
}

#[derive(Serialize)]
struct WorkerStatusEntry {
    component_id: String,
    status: String,
    recorded_at_ms: i64,
}

pub async fn run(opts: StatusOpts) -> anyhow::Result<()> {
    let report = tokio::task::spawn_blocking(move || build_report(&opts)).await??;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn build_report(opts: &StatusOpts) -> anyhow::Result<StatusReport> {
    let store = Store::open(std::path::Path::new(&opts.db_path))?;
    let now = chrono::Utc::now().timestamp_millis();
    let model_set_hash = tagfleet_probe::capacity::model_set_hash(std::path::Path::new(&opts.models_dir), now as u64);

    // The persisted row carries whichever GPU-capability value the probe
    // that wrote it observed; a fresh check here would be a resource-probe
    // concern, not a read-only status query.
    let estimate = store.get_capacity_estimate(&model_set_hash)?;

    let (gpu_capable, tier, calculated_workers, reason) = match &estimate {
        Some(estimate) => {
            let decision = select_execution_tier(estimate, opts.vram_budget_mb, opts.ram_budget_mb, opts.worker_count);
            (
                Some(estimate.gpu_capable),
                Some(decision.tier.to_string()),
                Some(decision.calculated_workers),
                Some(decision.reason),
            )
        }
        None => (None, None, None, None),
    };

    let active_claims = store.get_active_claim_count()?;

    let worker_statuses = collect_worker_statuses(&store)?;

    Ok(StatusReport {
        model_set_hash,
        gpu_capable,
        tier,
        calculated_workers,
        reason,
        active_claims,
        worker_statuses,
    })
}

fn collect_worker_statuses(store: &Store) -> anyhow::Result<Vec<WorkerStatusEntry>> {
    let mut out = Vec::new();
    for index in 0..64u32 {
        let component_id = format!("worker:tag:{index}");
        let history = store.get_health_history(&component_id)?;
        let Some((status, recorded_at_ms)) = history.into_iter().last() else {
            continue;
        };
        out.push(WorkerStatusEntry {
            component_id,
            status,
            recorded_at_ms,
        });
    }
    Ok(out)
}
