//! Static configuration for the worker supervision core.
//!
//! Loaded once at startup (see `tagfleet-runtime`) and passed down by value
//! or shared reference; nothing in this crate reads it from the environment
//! directly.

use serde::{Deserialize, Serialize};

fn default_worker_count() -> u32 {
    4
}

fn default_vram_budget_mb() -> u64 {
    16_384
}

fn default_ram_budget_mb() -> u64 {
    16_384
}

fn default_ram_detection_mode() -> RamDetectionMode {
    RamDetectionMode::Auto
}

fn default_heartbeat_timeout_ms() -> u64 {
    30_000
}

fn default_models_dir() -> String {
    "./models".to_string()
}

fn default_db_path() -> String {
    "./tagfleet.db".to_string()
}

/// How `tagfleet-probe` should determine the RAM budget available to
/// workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RamDetectionMode {
    /// Prefer the cgroup memory limit when one is set, else fall back to
    /// host-wide available memory.
    Auto,
    /// Read the container's cgroup memory limit (v1 or v2) only; no
    /// fallback if no limit is set.
    Cgroup,
    /// Read total host RAM via system telemetry, ignoring cgroups.
    Host,
}

/// Admission-control toggle. When disabled, the tier planner is bypassed
/// entirely and `worker_count` workers are started at Tier `FAST_PATH`
/// without running a capacity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManagementConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ResourceManagementConfig {
    fn default() -> Self {
        ResourceManagementConfig { enabled: true }
    }
}

/// Root configuration for the supervision core, the runtime's `serve`
/// subcommand, and the discovery workers it spawns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: u32,

    #[serde(default = "default_vram_budget_mb")]
    pub vram_budget_mb: u64,

    #[serde(default = "default_ram_budget_mb")]
    pub ram_budget_mb: u64,

    #[serde(default = "default_ram_detection_mode")]
    pub ram_detection_mode: RamDetectionMode,

    #[serde(default)]
    pub resource_management: ResourceManagementConfig,

    #[serde(default = "default_models_dir")]
    pub models_dir: String,

    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            worker_count: default_worker_count(),
            vram_budget_mb: default_vram_budget_mb(),
            ram_budget_mb: default_ram_budget_mb(),
            ram_detection_mode: default_ram_detection_mode(),
            resource_management: ResourceManagementConfig::default(),
            models_dir: default_models_dir(),
            db_path: default_db_path(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_resource_management() {
        let config = CoreConfig::default();
        assert!(config.resource_management.enabled);
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn deserializes_from_partial_json() {
        let json = r#"{"worker_count": 8, "resource_management": {"enabled": false}}"#;
        let config: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.worker_count, 8);
        assert!(!config.resource_management.enabled);
        assert_eq!(config.vram_budget_mb, default_vram_budget_mb());
    }

    #[test]
    fn deserializes_empty_object_to_defaults() {
        let config: CoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CoreConfig::default());
    }
}
