//! RAM telemetry: this process's resident set size, and available memory
//! under the configured detection mode (cgroup limit, host total, or auto
//! preferring cgroup with a host fallback).

use std::fs;

use sysinfo::{Pid, System};
use tagfleet_core::config::RamDetectionMode;

/// A limit above which a cgroup v1 `memory.limit_in_bytes` value is treated
/// as "no limit" rather than an actual cap. cgroup v1 reports this sentinel
/// as `LONG_MAX` rounded down to the nearest page.
const CGROUP_V1_UNLIMITED_THRESHOLD: u64 = 9_000_000_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamUsage {
    pub used_mb: u64,
    pub available_mb: u64,
    pub error: Option<String>,
}

/// Resident set size of the current process, in MB.
#[must_use]
pub fn current_process_rss_mb() -> u64 {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new_all();
    system.refresh_all();
    system
        .process(pid)
        .map(|p| p.memory() / (1024 * 1024))
        .unwrap_or(0)
}

/// Available memory in MB under the given detection mode. `Cgroup` reports
/// 0 (no error) rather than falling back to host stats when no cgroup limit
/// is set — callers that want the fallback should use `Auto`.
#[must_use]
pub fn available_memory_mb(mode: RamDetectionMode) -> u64 {
    match mode {
        RamDetectionMode::Auto => cgroup_available_mb().unwrap_or_else(host_available_mb),
        RamDetectionMode::Cgroup => cgroup_available_mb().unwrap_or(0),
        RamDetectionMode::Host => host_available_mb(),
    }
}

/// Combined RSS + available-memory snapshot. `error` is set when strict
/// `Cgroup` mode finds no cgroup memory limit to read.
#[must_use]
pub fn get_ram_usage_mb(mode: RamDetectionMode) -> RamUsage {
    let available_mb = available_memory_mb(mode);
    let error = if mode == RamDetectionMode::Cgroup && cgroup_available_mb().is_none() {
        Some("no cgroup memory limit set".to_string())
    } else {
        None
    };
    RamUsage {
        used_mb: current_process_rss_mb(),
        available_mb,
        error,
    }
}

fn host_available_mb() -> u64 {
    let mut system = System::new_all();
    system.refresh_memory();
    system.available_memory() / (1024 * 1024)
}

/// Reads the container's memory budget from cgroup v2 first, falling back
/// to cgroup v1. Returns `None` if neither is present or no limit is set,
/// so the caller can fall back to host-wide memory stats.
fn cgroup_available_mb() -> Option<u64> {
    if let Some(mb) = cgroup_v2_available_mb() {
        return Some(mb);
    }
    cgroup_v1_available_mb()
}

fn cgroup_v2_available_mb() -> Option<u64> {
    let max_str = fs::read_to_string("/sys/fs/cgroup/memory.max").ok()?;
    let max_str = max_str.trim();
    if max_str == "max" {
        return None;
    }
    let max_bytes: u64 = max_str.parse().ok()?;
    let current_bytes: u64 = fs::read_to_string("/sys/fs/cgroup/memory.current")
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(max_bytes.saturating_sub(current_bytes) / (1024 * 1024))
}

fn cgroup_v1_available_mb() -> Option<u64> {
    let limit_bytes: u64 = fs::read_to_string("/sys/fs/cgroup/memory/memory.limit_in_bytes")
        .ok()?
        .trim()
        .parse()
        .ok()?;
    if limit_bytes > CGROUP_V1_UNLIMITED_THRESHOLD {
        return None;
    }
    let usage_bytes: u64 = fs::read_to_string("/sys/fs/cgroup/memory/memory.usage_in_bytes")
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(limit_bytes.saturating_sub(usage_bytes) / (1024 * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_rss_is_nonzero() {
        assert!(current_process_rss_mb() > 0);
    }

    #[test]
    fn host_available_mb_is_nonzero_on_any_real_host() {
        assert!(host_available_mb() > 0);
    }

    #[test]
    fn strict_cgroup_mode_reports_zero_with_error_when_no_limit_present() {
        // On a host/CI runner with no cgroup memory limit configured, strict
        // `Cgroup` mode does not fall back to host stats.
        if cgroup_available_mb().is_some() {
            return;
        }
        let usage = get_ram_usage_mb(RamDetectionMode::Cgroup);
        assert_eq!(usage.available_mb, 0);
        assert!(usage.error.is_some());
    }

    #[test]
    fn auto_mode_never_reports_an_error() {
        assert!(get_ram_usage_mb(RamDetectionMode::Auto).error.is_none());
    }
}
