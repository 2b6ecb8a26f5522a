//! Claim coordination: atomic claim acquisition plus the three-pass
//! stale-claim garbage collector.
//!
//! Claims are ephemeral leases, not authoritative file state — losing one
//! to a crash just means another worker picks the file back up. The claim
//! key is deterministic (`"claim_" + file_id`) so the primary-key insert
//! itself is the race-free claim operation.

use rusqlite::{params, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::store::Store;

fn claim_key(file_id: &str) -> String {
    format!("claim_{file_id}")
}

impl Store {
    /// First unclaimed file still needing tagging, ordered by primary key.
    /// `None` if there is no eligible work right now.
    pub fn discover_next_file(&self) -> Result<Option<String>> {
        let file_id = self
            .conn
            .query_row(
                "SELECT file_id FROM library_files
                 WHERE needs_tagging = 1 AND is_valid = 1
                   AND file_id NOT IN (SELECT file_id FROM worker_claims)
                 ORDER BY file_id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(file_id)
    }

    /// Discover the next eligible file and claim it in one step. Returns
    /// `None` either when there is no eligible file, or when another worker
    /// claimed it first between the discovery read and the claim insert.
    pub fn discover_and_claim_file(&self, worker_id: &str, now_ms: i64) -> Result<Option<String>> {
        let Some(file_id) = self.discover_next_file()? else {
            return Ok(None);
        };
        if self.try_claim_file(&file_id, worker_id, now_ms)? {
            Ok(Some(file_id))
        } else {
            Ok(None)
        }
    }

    pub fn file_exists(&self, file_id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM library_files WHERE file_id = ?1",
            params![file_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Flip a file to tagged, also clearing `needs_tagging` so it drops out
    /// of future `discover_next_file` results.
    pub fn mark_file_tagged(&self, file_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE library_files SET tagged = 1, needs_tagging = 0 WHERE file_id = ?1",
            params![file_id],
        )?;
        Ok(())
    }

    /// Attempt to claim a file for processing. Returns `Ok(true)` if this
    /// caller now holds the claim, `Ok(false)` if it was already claimed.
    pub fn try_claim_file(&self, file_id: &str, worker_id: &str, now_ms: i64) -> Result<bool> {
        let result = self.conn.execute(
            "INSERT INTO worker_claims (claim_key, file_id, worker_id, claimed_at_ms)
             VALUES (?1, ?2, ?3, ?4)",
            params![claim_key(file_id), file_id, worker_id, now_ms],
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

    /// Release a claim. A no-op (not an error) if the file was not claimed.
    pub fn release_claim(&self, file_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM worker_claims WHERE claim_key = ?1",
            params![claim_key(file_id)],
        )?;
        Ok(())
    }

    pub fn get_active_claim_count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM worker_claims", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn get_claims_for_worker(&self, worker_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_id FROM worker_claims WHERE worker_id = ?1")?;
        let rows = stmt.query_map(params![worker_id], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Release every claim held by a specific worker (used when a worker is
    /// unregistered/restarted).
    pub fn release_claims_for_worker(&self, worker_id: &str) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM worker_claims WHERE worker_id = ?1",
            params![worker_id],
        )?;
        Ok(removed)
    }

    /// Pass 1: remove claims held by workers whose last heartbeat predates
    /// `heartbeat_cutoff_ms`, including workers with no `worker_health` row
    /// at all (never reported, or unregistered).
    pub fn cleanup_inactive_worker_claims(&self, heartbeat_cutoff_ms: i64) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM worker_claims
             WHERE worker_id NOT IN (
                 SELECT component_id FROM worker_health
                 WHERE last_heartbeat_wall_ms > ?1
             )",
            params![heartbeat_cutoff_ms],
        )?;
        Ok(removed)
    }

    /// Pass 2: remove claims for files that are already tagged or no longer
    /// need tagging.
    pub fn cleanup_completed_file_claims(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM worker_claims
             WHERE file_id IN (
                 SELECT file_id FROM library_files
                 WHERE tagged = 1 OR needs_tagging = 0
             )",
            [],
        )?;
        Ok(removed)
    }

    /// Pass 3: remove claims for files that no longer exist, no longer need
    /// tagging, or are marked invalid.
    pub fn cleanup_ineligible_file_claims(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM worker_claims
             WHERE file_id NOT IN (SELECT file_id FROM library_files)
                OR file_id IN (
                    SELECT file_id FROM library_files
                    WHERE needs_tagging = 0 OR is_valid = 0
                )",
            [],
        )?;
        Ok(removed)
    }

    /// Run all three cleanup passes and return the total number of claims
    /// removed.
    pub fn cleanup_all_stale_claims(&self, now_ms: i64, heartbeat_timeout_ms: i64) -> Result<usize> {
        let heartbeat_cutoff = now_ms - heartbeat_timeout_ms;
        let mut removed = 0;
        removed += self.cleanup_inactive_worker_claims(heartbeat_cutoff)?;
        removed += self.cleanup_completed_file_claims()?;
        removed += self.cleanup_ineligible_file_claims()?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_file(store: &Store, file_id: &str, needs_tagging: i64, is_valid: i64, tagged: i64) {
        store
            .conn
            .execute(
                "INSERT INTO library_files (file_id, needs_tagging, is_valid, tagged)
                 VALUES (?1, ?2, ?3, ?4)",
                params![file_id, needs_tagging, is_valid, tagged],
            )
            .unwrap();
    }

    fn seed_heartbeat(store: &Store, worker_id: &str, last_heartbeat_ms: i64) {
        store
            .conn
            .execute(
                "INSERT INTO worker_health (component_id, last_heartbeat_wall_ms) VALUES (?1, ?2)",
                params![worker_id, last_heartbeat_ms],
            )
            .unwrap();
    }

    #[test]
    fn discover_next_file_skips_invalid_and_completed_files() {
        let store = Store::open_in_memory().unwrap();
        seed_file(&store, "file1", 0, 1, 1); // tagged, not eligible
        seed_file(&store, "file2", 1, 0, 0); // invalid, not eligible
        seed_file(&store, "file3", 1, 1, 0); // eligible

        assert_eq!(store.discover_next_file().unwrap(), Some("file3".to_string()));
    }

    #[test]
    fn discover_next_file_excludes_already_claimed_files() {
        let store = Store::open_in_memory().unwrap();
        seed_file(&store, "file1", 1, 1, 0);
        seed_file(&store, "file2", 1, 1, 0);
        store.try_claim_file("file1", "w0", 1000).unwrap();

        assert_eq!(store.discover_next_file().unwrap(), Some("file2".to_string()));
    }

    #[test]
    fn discover_next_file_returns_none_when_nothing_eligible() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.discover_next_file().unwrap(), None);
    }

    #[test]
    fn discover_and_claim_file_claims_the_discovered_file() {
        let store = Store::open_in_memory().unwrap();
        seed_file(&store, "file1", 1, 1, 0);

        let claimed = store.discover_and_claim_file("w0", 1000).unwrap();
        assert_eq!(claimed, Some("file1".to_string()));
        assert_eq!(store.get_claims_for_worker("w0").unwrap(), vec!["file1"]);
    }

    #[test]
    fn mark_file_tagged_clears_needs_tagging() {
        let store = Store::open_in_memory().unwrap();
        seed_file(&store, "file1", 1, 1, 0);
        store.mark_file_tagged("file1").unwrap();
        assert_eq!(store.discover_next_file().unwrap(), None);
    }

    #[test]
    fn file_exists_reflects_library_files_rows() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store.file_exists("file1").unwrap());
        seed_file(&store, "file1", 1, 1, 0);
        assert!(store.file_exists("file1").unwrap());
    }

    #[test]
    fn claim_is_atomic_second_attempt_fails() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.try_claim_file("file1", "worker:tag:0", 1000).unwrap());
        assert!(!store.try_claim_file("file1", "worker:tag:1", 1001).unwrap());
    }

    #[test]
    fn release_then_reclaim_succeeds() {
        let store = Store::open_in_memory().unwrap();
        store.try_claim_file("file1", "worker:tag:0", 1000).unwrap();
        store.release_claim("file1").unwrap();
        assert!(store.try_claim_file("file1", "worker:tag:1", 2000).unwrap());
    }

    #[test]
    fn releasing_unclaimed_file_is_a_noop() {
        let store = Store::open_in_memory().unwrap();
        store.release_claim("never-claimed").unwrap();
    }

    #[test]
    fn cleanup_inactive_worker_claims_removes_stale_worker_claims() {
        let store = Store::open_in_memory().unwrap();
        seed_heartbeat(&store, "worker:tag:0", 500);
        seed_heartbeat(&store, "worker:tag:1", 9000);
        store.try_claim_file("file1", "worker:tag:0", 1000).unwrap();
        store.try_claim_file("file2", "worker:tag:1", 1000).unwrap();

        let removed = store.cleanup_inactive_worker_claims(5000).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_active_claim_count().unwrap(), 1);
        assert_eq!(store.get_claims_for_worker("worker:tag:1").unwrap(), vec!["file2"]);
    }

    #[test]
    fn cleanup_inactive_worker_claims_removes_claims_with_no_heartbeat_row() {
        let store = Store::open_in_memory().unwrap();
        store.try_claim_file("file1", "worker:ghost:0", 1000).unwrap();
        let removed = store.cleanup_inactive_worker_claims(0).unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn cleanup_completed_file_claims_removes_tagged_files() {
        let store = Store::open_in_memory().unwrap();
        seed_file(&store, "file1", 1, 1, 1);
        seed_file(&store, "file2", 0, 1, 0);
        seed_file(&store, "file3", 1, 1, 0);
        store.try_claim_file("file1", "w0", 1000).unwrap();
        store.try_claim_file("file2", "w0", 1000).unwrap();
        store.try_claim_file("file3", "w0", 1000).unwrap();

        let removed = store.cleanup_completed_file_claims().unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.get_active_claim_count().unwrap(), 1);
    }

    #[test]
    fn cleanup_ineligible_file_claims_removes_missing_invalid_and_no_longer_needed() {
        let store = Store::open_in_memory().unwrap();
        seed_file(&store, "file2", 1, 0, 0); // invalid
        seed_file(&store, "file3", 0, 1, 0); // no longer needs tagging
        seed_file(&store, "file4", 1, 1, 0); // still eligible
        store.try_claim_file("file1", "w0", 1000).unwrap(); // no library_files row at all
        store.try_claim_file("file2", "w0", 1000).unwrap();
        store.try_claim_file("file3", "w0", 1000).unwrap();
        store.try_claim_file("file4", "w0", 1000).unwrap();

        let removed = store.cleanup_ineligible_file_claims().unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.get_claims_for_worker("w0").unwrap(), vec!["file4"]);
    }

    #[test]
    fn cleanup_all_stale_claims_runs_all_three_passes() {
        let store = Store::open_in_memory().unwrap();
        seed_heartbeat(&store, "w0", 9000);
        seed_file(&store, "file1", 1, 1, 0); // eligible, active worker -> kept
        seed_file(&store, "file2", 0, 1, 0); // completed -> pass 2
        store.try_claim_file("file1", "w0", 1000).unwrap();
        store.try_claim_file("file2", "w0", 1000).unwrap();
        store.try_claim_file("file3", "ghost", 1000).unwrap(); // inactive worker -> pass 1

        let removed = store.cleanup_all_stale_claims(10000, 5000).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.get_claims_for_worker("w0").unwrap(), vec!["file1"]);
    }

    #[test]
    fn release_claims_for_worker_removes_only_that_workers_claims() {
        let store = Store::open_in_memory().unwrap();
        store.try_claim_file("file1", "w0", 1000).unwrap();
        store.try_claim_file("file2", "w1", 1000).unwrap();

        let removed = store.release_claims_for_worker("w0").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get_active_claim_count().unwrap(), 1);
    }
}
