//! One-shot per-model-set capacity measurement: walks the models directory
//! to compute its content hash, then measures how much RAM/VRAM a warmup of
//! that model set actually consumes.
//!
//! The warmup step itself — loading backbones and heads — is ML-runtime
//! specific and out of scope here, so it is injected as an async closure.
//! This keeps the probe crate free of any inference-framework dependency.

use std::future::Future;
use std::path::Path;

use tagfleet_core::capacity::CapacityEstimate;
use tagfleet_core::config::RamDetectionMode;
use tagfleet_core::hash::{compute_model_set_hash, fallback_hash, ManifestEntry};

use crate::gpu::{check_gpu_capability, get_vram_usage_for_pid_mb};
use crate::ram::get_ram_usage_mb;

/// Below this measured RAM delta (MB) we assume the warmup closure under-
/// reports (e.g. copy-on-write pages not yet resident) and clamp up to a
/// floor that covers typical head overhead.
const MIN_PLAUSIBLE_WORKER_RAM_MB: u64 = 1024;
const WORKER_RAM_FLOOR_MB: u64 = 2048;

/// Model filename extensions counted toward the model-set hash.
const MODEL_FILE_EXTENSIONS: &[&str] = &[".pb", ".h5", ".json"];

/// Recursively collect `(relative_path, size)` pairs for every model file
/// under `models_dir`, for feeding into [`compute_model_set_hash`].
pub fn collect_manifest(models_dir: &Path) -> std::io::Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    walk(models_dir, models_dir, &mut entries)?;
    Ok(entries)
}

fn walk(root: &Path, dir: &Path, entries: &mut Vec<ManifestEntry>) -> std::io::Result<()> {
    for item in std::fs::read_dir(dir)? {
        let item = item?;
        let path = item.path();
        if path.is_dir() {
            walk(root, &path, entries)?;
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !MODEL_FILE_EXTENSIONS.iter().any(|ext| name.ends_with(ext)) {
            continue;
        }
        let metadata = item.metadata()?;
        let relative_path = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .into_owned();
        entries.push(ManifestEntry {
            relative_path,
            size_bytes: metadata.len(),
        });
    }
    Ok(())
}

/// Hash the models directory, falling back to a timestamp-seeded hash if it
/// cannot be walked (missing directory, permission error).
#[must_use]
pub fn model_set_hash(models_dir: &Path, fallback_seed_wall_ms: u64) -> String {
    match collect_manifest(models_dir) {
        Ok(entries) => compute_model_set_hash(&entries),
        Err(_) => fallback_hash(fallback_seed_wall_ms),
    }
}

/// Run the warmup closure while measuring RAM/VRAM before and after, and
/// fold the result into a [`CapacityEstimate`]. Callers are responsible for
/// ensuring only one probe runs at a time per model set (see the Probe Lock
/// coordination in `tagfleet-store`/`tagfleet-supervisor`).
pub async fn measure<F, Fut>(
    hash: String,
    ram_detection_mode: RamDetectionMode,
    warmup: F,
) -> CapacityEstimate
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    let gpu_capable = check_gpu_capability().await;

    let ram_before = get_ram_usage_mb(ram_detection_mode).used_mb;
    let vram_before = if gpu_capable {
        get_vram_usage_for_pid_mb(std::process::id()).await
    } else {
        0
    };

    warmup().await;

    let ram_after = get_ram_usage_mb(ram_detection_mode).used_mb;
    let vram_after = if gpu_capable {
        get_vram_usage_for_pid_mb(std::process::id()).await
    } else {
        0
    };

    let backbone_vram_mb = vram_after.saturating_sub(vram_before);
    let mut worker_ram_mb = ram_after.saturating_sub(ram_before);
    if worker_ram_mb < MIN_PLAUSIBLE_WORKER_RAM_MB {
        worker_ram_mb = worker_ram_mb.max(WORKER_RAM_FLOOR_MB);
    }

    CapacityEstimate {
        model_set_hash: hash,
        measured_backbone_vram_mb: backbone_vram_mb,
        estimated_worker_ram_mb: worker_ram_mb,
        gpu_capable,
        is_conservative: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn collect_manifest_finds_model_files_recursively() {
        let tmp = std::env::temp_dir().join(format!("tagfleet-probe-test-{}", std::process::id()));
        std::fs::create_dir_all(tmp.join("sub")).unwrap();
        std::fs::File::create(tmp.join("backbone.pb"))
            .unwrap()
            .write_all(b"1234")
            .unwrap();
        std::fs::File::create(tmp.join("sub/head.json"))
            .unwrap()
            .write_all(b"{}")
            .unwrap();
        std::fs::File::create(tmp.join("readme.txt")).unwrap();

        let entries = collect_manifest(&tmp).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.relative_path == "backbone.pb"));

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn model_set_hash_falls_back_when_directory_missing() {
        let missing = Path::new("/nonexistent/tagfleet-probe-dir");
        let hash = model_set_hash(missing, 42);
        assert_eq!(hash, fallback_hash(42));
    }

    #[tokio::test]
    async fn measure_clamps_small_ram_delta_to_floor() {
        let estimate = measure("hash123".to_string(), RamDetectionMode::Host, || async {}).await;
        assert_eq!(estimate.estimated_worker_ram_mb, WORKER_RAM_FLOOR_MB);
        assert!(!estimate.is_conservative);
    }
}
