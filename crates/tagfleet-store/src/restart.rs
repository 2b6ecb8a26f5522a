//! Persisted restart-policy state: restart counters and permanent-failure
//! markers that must survive process restarts.
//!
//! This is deliberately separate from health telemetry. Restart *decisions*
//! are made in-memory by the health monitor reactor from live state; this
//! table only remembers counters across restarts of the supervising
//! process itself.

use rusqlite::{params, OptionalExtension};

use crate::error::Result;
use crate::store::Store;

impl Store {
    /// `(restart_count, last_restart_wall_ms)`, defaulting to `(0, None)`
    /// for a component that has never restarted.
    pub fn get_restart_state(&self, component_id: &str) -> Result<(u32, Option<i64>)> {
        let row = self
            .conn
            .query_row(
                "SELECT restart_count, last_restart_wall_ms FROM worker_restart_policy
                 WHERE component_id = ?1",
                params![component_id],
                |row| {
                    let count: i64 = row.get(0)?;
                    let last: Option<i64> = row.get(1)?;
                    Ok((count as u32, last))
                },
            )
            .optional()?;
        Ok(row.unwrap_or((0, None)))
    }

    /// Increment the restart counter and bump the timestamp, creating the
    /// row on the first restart.
    pub fn increment_restart_count(&self, component_id: &str, now_ms: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO worker_restart_policy
                (component_id, restart_count, last_restart_wall_ms, updated_at_wall_ms)
             VALUES (?1, 1, ?2, ?2)
             ON CONFLICT(component_id) DO UPDATE SET
                restart_count = restart_count + 1,
                last_restart_wall_ms = excluded.last_restart_wall_ms,
                updated_at_wall_ms = excluded.updated_at_wall_ms",
            params![component_id, now_ms],
        )?;
        Ok(())
    }

    /// Reset the restart counter to 0 (manual admin reset, or a component
    /// that has proven stable for long enough).
    pub fn reset_restart_count(&self, component_id: &str, now_ms: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE worker_restart_policy
             SET restart_count = 0, last_restart_wall_ms = NULL, updated_at_wall_ms = ?2
             WHERE component_id = ?1",
            params![component_id, now_ms],
        )?;
        Ok(())
    }

    /// Mark a component as permanently failed. Does not touch
    /// `restart_count`, preserving the history that led to this decision.
    pub fn mark_restart_failed_permanent(
        &self,
        component_id: &str,
        failure_reason: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO worker_restart_policy
                (component_id, restart_count, failed_at_wall_ms, failure_reason, updated_at_wall_ms)
             VALUES (?1, 0, ?2, ?3, ?2)
             ON CONFLICT(component_id) DO UPDATE SET
                failed_at_wall_ms = excluded.failed_at_wall_ms,
                failure_reason = excluded.failure_reason,
                updated_at_wall_ms = excluded.updated_at_wall_ms",
            params![component_id, now_ms, failure_reason],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_component_defaults_to_zero_with_no_timestamp() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_restart_state("worker:tag:0").unwrap(), (0, None));
    }

    #[test]
    fn increment_creates_row_then_increments() {
        let store = Store::open_in_memory().unwrap();
        store.increment_restart_count("worker:tag:0", 1000).unwrap();
        assert_eq!(store.get_restart_state("worker:tag:0").unwrap(), (1, Some(1000)));

        store.increment_restart_count("worker:tag:0", 2000).unwrap();
        assert_eq!(store.get_restart_state("worker:tag:0").unwrap(), (2, Some(2000)));
    }

    #[test]
    fn reset_restart_count_clears_counter_and_timestamp() {
        let store = Store::open_in_memory().unwrap();
        store.increment_restart_count("worker:tag:0", 1000).unwrap();
        store.increment_restart_count("worker:tag:0", 2000).unwrap();
        store.reset_restart_count("worker:tag:0", 3000).unwrap();
        assert_eq!(store.get_restart_state("worker:tag:0").unwrap(), (0, None));
    }

    #[test]
    fn mark_failed_permanent_does_not_touch_restart_count() {
        let store = Store::open_in_memory().unwrap();
        store.increment_restart_count("worker:tag:0", 1000).unwrap();
        store.increment_restart_count("worker:tag:0", 2000).unwrap();

        store
            .mark_restart_failed_permanent("worker:tag:0", "exceeded lifetime restart limit", 3000)
            .unwrap();

        assert_eq!(store.get_restart_state("worker:tag:0").unwrap(), (2, Some(2000)));
    }

    #[test]
    fn mark_failed_permanent_on_new_component_creates_row() {
        let store = Store::open_in_memory().unwrap();
        store
            .mark_restart_failed_permanent("worker:tag:0", "never started", 1000)
            .unwrap();
        assert_eq!(store.get_restart_state("worker:tag:0").unwrap(), (0, None));
    }
}
