//! GPU capability gating and VRAM telemetry via `nvidia-smi` subprocess
//! calls, each bounded by a hard timeout so a wedged driver cannot block the
//! supervisor.
//!
//! Capability (can we use the GPU at all) is checked once and cached
//! forever for the process lifetime. Telemetry (how much VRAM is in use
//! right now) is not cached here — callers that want a TTL should wrap this
//! with their own cache, mirroring the probe's "capability is permanent,
//! telemetry is not" split.

use std::time::Duration;

use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio::time::timeout;

use crate::error::ProbeError;

/// Hard timeout for every `nvidia-smi` invocation.
pub const NVIDIA_SMI_TIMEOUT: Duration = Duration::from_secs(5);

static GPU_CAPABLE: OnceCell<bool> = OnceCell::const_new();

/// Usage for a single GPU as reported by `nvidia-smi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VramUsage {
    pub used_mb: u64,
    pub total_mb: u64,
}

/// Check whether an NVIDIA GPU is usable in this container, i.e.
/// `nvidia-smi` runs successfully and reports at least one device. Cached
/// forever after the first successful or failed probe.
pub async fn check_gpu_capability() -> bool {
    *GPU_CAPABLE
        .get_or_init(|| async { probe_gpu_capability().await.unwrap_or(false) })
        .await
}

async fn probe_gpu_capability() -> Result<bool, ProbeError> {
    let output = run_nvidia_smi(&["--query-gpu=name", "--format=csv,noheader"]).await?;
    Ok(!output.trim().is_empty())
}

/// Sum VRAM used/total across all GPUs. Only meaningful once
/// [`check_gpu_capability`] has returned `true`.
pub async fn get_vram_usage_mb() -> Result<VramUsage, ProbeError> {
    let output = run_nvidia_smi(&[
        "--query-gpu=memory.used,memory.total",
        "--format=csv,noheader,nounits",
    ])
    .await?;

    let mut used_mb = 0u64;
    let mut total_mb = 0u64;
    for line in output.lines() {
        let mut parts = line.split(',');
        let used = parts.next().and_then(|s| s.trim().parse::<u64>().ok());
        let total = parts.next().and_then(|s| s.trim().parse::<u64>().ok());
        match (used, total) {
            (Some(u), Some(t)) => {
                used_mb += u;
                total_mb += t;
            }
            _ => continue,
        }
    }
    Ok(VramUsage { used_mb, total_mb })
}

/// VRAM used by a specific process, or 0 if it is not found in the compute
/// apps list or the query fails.
pub async fn get_vram_usage_for_pid_mb(pid: u32) -> u64 {
    let Ok(output) = run_nvidia_smi(&[
        "--query-compute-apps=pid,used_memory",
        "--format=csv,noheader,nounits",
    ])
    .await
    else {
        return 0;
    };

    for line in output.lines() {
        let mut parts = line.split(',');
        let proc_pid = parts.next().and_then(|s| s.trim().parse::<u32>().ok());
        let used_mb = parts.next().and_then(|s| s.trim().parse::<u64>().ok());
        if let (Some(p), Some(u)) = (proc_pid, used_mb) {
            if p == pid {
                return u;
            }
        }
    }
    0
}

async fn run_nvidia_smi(args: &[&str]) -> Result<String, ProbeError> {
    let command = async {
        Command::new("nvidia-smi")
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
    };

    let output = match timeout(NVIDIA_SMI_TIMEOUT, command).await {
        Ok(result) => result?,
        Err(_) => return Err(ProbeError::Timeout(NVIDIA_SMI_TIMEOUT)),
    };

    if output.status.success() {
        String::from_utf8(output.stdout).map_err(|e| ProbeError::ParseFailure(e.to_string()))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ProbeError::ExitFailure(if stderr.is_empty() {
            format!("exit code {:?}", output.status.code())
        } else {
            stderr
        }))
    }
}
