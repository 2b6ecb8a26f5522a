//! Probe-lock and capacity-estimate persistence.
//!
//! The lock table enforces "one probe per model set at a time" via a
//! primary-key insert: the first worker to insert a row for a given
//! `model_set_hash` owns the probe, everyone else gets a conflict and polls
//! `get_probe_lock_status` until it flips to `complete`.

use rusqlite::{params, OptionalExtension};
use tagfleet_core::capacity::CapacityEstimate;

use crate::error::{Result, StoreError};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeLockStatus {
    InProgress,
    Complete,
}

impl ProbeLockStatus {
    fn as_str(self) -> &'static str {
        match self {
            ProbeLockStatus::InProgress => "in_progress",
            ProbeLockStatus::Complete => "complete",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(ProbeLockStatus::InProgress),
            "complete" => Some(ProbeLockStatus::Complete),
            _ => None,
        }
    }
}

impl Store {
    /// Attempt to acquire the probe lock for a model set. Returns
    /// `Ok(true)` if this caller now owns the probe, `Ok(false)` if another
    /// worker already holds (or completed) it.
    pub fn try_acquire_probe_lock(
        &self,
        model_set_hash: &str,
        worker_id: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let result = self.conn.execute(
            "INSERT INTO capacity_probe_locks (model_set_hash, status, worker_id, started_at_ms)
             VALUES (?1, 'in_progress', ?2, ?3)",
            params![model_set_hash, worker_id, now_ms],
        );
        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(false)
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    pub fn get_probe_lock_status(&self, model_set_hash: &str) -> Result<Option<ProbeLockStatus>> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM capacity_probe_locks WHERE model_set_hash = ?1",
                params![model_set_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.and_then(|s| ProbeLockStatus::parse(&s)))
    }

    pub fn complete_probe_lock(&self, model_set_hash: &str, now_ms: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE capacity_probe_locks SET status = 'complete', completed_at_ms = ?2
             WHERE model_set_hash = ?1",
            params![model_set_hash, now_ms],
        )?;
        Ok(())
    }

    pub fn release_probe_lock(&self, model_set_hash: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM capacity_probe_locks WHERE model_set_hash = ?1",
            params![model_set_hash],
        )?;
        Ok(())
    }

    pub fn get_capacity_estimate(&self, model_set_hash: &str) -> Result<Option<CapacityEstimate>> {
        let row = self
            .conn
            .query_row(
                "SELECT measured_backbone_vram_mb, estimated_worker_ram_mb, gpu_capable
                 FROM capacity_estimates WHERE model_set_hash = ?1",
                params![model_set_hash],
                |row| {
                    let vram: i64 = row.get(0)?;
                    let ram: i64 = row.get(1)?;
                    let gpu_capable: i64 = row.get(2)?;
                    Ok((vram as u64, ram as u64, gpu_capable != 0))
                },
            )
            .optional()?;

        Ok(row.map(|(vram, ram, gpu_capable)| CapacityEstimate {
            model_set_hash: model_set_hash.to_string(),
            measured_backbone_vram_mb: vram,
            estimated_worker_ram_mb: ram,
            gpu_capable,
            is_conservative: false,
        }))
    }

    pub fn save_capacity_estimate(
        &self,
        estimate: &CapacityEstimate,
        probe_duration_s: f64,
        probed_by: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO capacity_estimates
                (model_set_hash, measured_backbone_vram_mb, estimated_worker_ram_mb,
                 gpu_capable, probe_duration_s, probed_by, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(model_set_hash) DO UPDATE SET
                measured_backbone_vram_mb = excluded.measured_backbone_vram_mb,
                estimated_worker_ram_mb = excluded.estimated_worker_ram_mb,
                gpu_capable = excluded.gpu_capable,
                probe_duration_s = excluded.probe_duration_s,
                probed_by = excluded.probed_by,
                updated_at_ms = excluded.updated_at_ms",
            params![
                estimate.model_set_hash,
                estimate.measured_backbone_vram_mb as i64,
                estimate.estimated_worker_ram_mb as i64,
                i64::from(estimate.gpu_capable),
                probe_duration_s,
                probed_by,
                now_ms,
            ],
        )?;
        Ok(())
    }

    /// Delete a capacity estimate and its associated lock, for invalidation
    /// on model set change.
    pub fn delete_capacity_estimate(&self, model_set_hash: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM capacity_estimates WHERE model_set_hash = ?1",
            params![model_set_hash],
        )?;
        self.release_probe_lock(model_set_hash)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimate(hash: &str) -> CapacityEstimate {
        CapacityEstimate {
            model_set_hash: hash.to_string(),
            measured_backbone_vram_mb: 4096,
            estimated_worker_ram_mb: 2048,
            gpu_capable: true,
            is_conservative: false,
        }
    }

    #[test]
    fn first_lock_acquisition_succeeds_second_fails() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.try_acquire_probe_lock("hash1", "worker:tag:0", 1000).unwrap());
        assert!(!store.try_acquire_probe_lock("hash1", "worker:tag:1", 1001).unwrap());
    }

    #[test]
    fn lock_status_transitions_in_progress_to_complete() {
        let store = Store::open_in_memory().unwrap();
        store.try_acquire_probe_lock("hash1", "worker:tag:0", 1000).unwrap();
        assert_eq!(
            store.get_probe_lock_status("hash1").unwrap(),
            Some(ProbeLockStatus::InProgress)
        );
        store.complete_probe_lock("hash1", 2000).unwrap();
        assert_eq!(
            store.get_probe_lock_status("hash1").unwrap(),
            Some(ProbeLockStatus::Complete)
        );
    }

    #[test]
    fn missing_lock_status_is_none() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_probe_lock_status("nope").unwrap(), None);
    }

    #[test]
    fn save_and_get_capacity_estimate_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_capacity_estimate(&estimate("hash1"), 3.5, "worker:tag:0", 1000)
            .unwrap();

        let loaded = store.get_capacity_estimate("hash1").unwrap().unwrap();
        assert_eq!(loaded.measured_backbone_vram_mb, 4096);
        assert_eq!(loaded.estimated_worker_ram_mb, 2048);
        assert!(loaded.gpu_capable);
        assert!(!loaded.is_conservative);
    }

    #[test]
    fn gpu_capable_false_round_trips_without_defaulting_to_true() {
        let store = Store::open_in_memory().unwrap();
        let mut cpu_only = estimate("hash-cpu");
        cpu_only.gpu_capable = false;
        store
            .save_capacity_estimate(&cpu_only, 1.0, "worker:tag:0", 1000)
            .unwrap();

        let loaded = store.get_capacity_estimate("hash-cpu").unwrap().unwrap();
        assert!(!loaded.gpu_capable);
    }

    #[test]
    fn save_capacity_estimate_upserts() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_capacity_estimate(&estimate("hash1"), 3.5, "worker:tag:0", 1000)
            .unwrap();

        let mut updated = estimate("hash1");
        updated.measured_backbone_vram_mb = 8192;
        store
            .save_capacity_estimate(&updated, 4.0, "worker:tag:1", 2000)
            .unwrap();

        let loaded = store.get_capacity_estimate("hash1").unwrap().unwrap();
        assert_eq!(loaded.measured_backbone_vram_mb, 8192);
    }

    #[test]
    fn delete_capacity_estimate_also_releases_lock() {
        let store = Store::open_in_memory().unwrap();
        store.try_acquire_probe_lock("hash1", "worker:tag:0", 1000).unwrap();
        store
            .save_capacity_estimate(&estimate("hash1"), 3.5, "worker:tag:0", 1000)
            .unwrap();

        store.delete_capacity_estimate("hash1").unwrap();

        assert!(store.get_capacity_estimate("hash1").unwrap().is_none());
        assert_eq!(store.get_probe_lock_status("hash1").unwrap(), None);
    }
}
