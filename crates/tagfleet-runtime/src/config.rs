//! Builds a `tagfleet_core::config::CoreConfig` from CLI flags. File-based
//! config parsing is out of scope; the typed struct every §4 module takes as
//! a parameter is populated directly from `ServeOpts`/`StatusOpts`.

use anyhow::{bail, Result};
use tagfleet_core::config::{CoreConfig, RamDetectionMode, ResourceManagementConfig};

use crate::cli::ServeOpts;

pub fn from_serve_opts(opts: &ServeOpts) -> Result<CoreConfig> {
    Ok(CoreConfig {
        worker_count: opts.worker_count,
        vram_budget_mb: opts.vram_budget_mb,
        ram_budget_mb: opts.ram_budget_mb,
        ram_detection_mode: parse_ram_detection_mode(&opts.ram_detection_mode)?,
        resource_management: ResourceManagementConfig {
            enabled: !opts.disable_resource_management,
        },
        models_dir: opts.models_dir.clone(),
        db_path: opts.db_path.clone(),
        heartbeat_timeout_ms: opts.heartbeat_timeout_ms,
    })
}

fn parse_ram_detection_mode(s: &str) -> Result<RamDetectionMode> {
    match s {
        "auto" => Ok(RamDetectionMode::Auto),
        "cgroup" => Ok(RamDetectionMode::Cgroup),
        "host" => Ok(RamDetectionMode::Host),
        other => bail!("unknown ram detection mode: {other} (expected auto, cgroup, or host)"),
    }
}
