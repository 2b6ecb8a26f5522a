//! Health snapshot persistence: the worker heartbeat table used by the
//! claim GC's "is this worker still alive" check, and a best-effort append
//! log of status transitions for observability.

use rusqlite::{params, OptionalExtension};

use crate::error::Result;
use crate::store::Store;

impl Store {
    /// Upsert the last-heartbeat timestamp for a component.
    pub fn record_heartbeat(&self, component_id: &str, now_ms: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO worker_health (component_id, last_heartbeat_wall_ms)
             VALUES (?1, ?2)
             ON CONFLICT(component_id) DO UPDATE SET last_heartbeat_wall_ms = excluded.last_heartbeat_wall_ms",
            params![component_id, now_ms],
        )?;
        Ok(())
    }

    pub fn get_last_heartbeat(&self, component_id: &str) -> Result<Option<i64>> {
        let ts: Option<i64> = self
            .conn
            .query_row(
                "SELECT last_heartbeat_wall_ms FROM worker_health WHERE component_id = ?1",
                params![component_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }

    /// Remove the heartbeat row for a component, e.g. on unregistration.
    pub fn remove_heartbeat(&self, component_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM worker_health WHERE component_id = ?1",
            params![component_id],
        )?;
        Ok(())
    }

    /// Append a status-change record. Best-effort: callers should log and
    /// continue rather than propagate failures from this path, mirroring
    /// the periodic history snapshot in the health monitor reactor.
    pub fn append_health_history(
        &self,
        component_id: &str,
        status: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO worker_health_history (component_id, status, recorded_at_ms)
             VALUES (?1, ?2, ?3)",
            params![component_id, status, now_ms],
        )?;
        Ok(())
    }

    pub fn get_health_history(&self, component_id: &str) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, recorded_at_ms FROM worker_health_history
             WHERE component_id = ?1 ORDER BY recorded_at_ms ASC",
        )?;
        let rows = stmt.query_map(params![component_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_read_heartbeat_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_last_heartbeat("worker:tag:0").unwrap(), None);

        store.record_heartbeat("worker:tag:0", 1000).unwrap();
        assert_eq!(store.get_last_heartbeat("worker:tag:0").unwrap(), Some(1000));

        store.record_heartbeat("worker:tag:0", 2000).unwrap();
        assert_eq!(store.get_last_heartbeat("worker:tag:0").unwrap(), Some(2000));
    }

    #[test]
    fn remove_heartbeat_clears_row() {
        let store = Store::open_in_memory().unwrap();
        store.record_heartbeat("worker:tag:0", 1000).unwrap();
        store.remove_heartbeat("worker:tag:0").unwrap();
        assert_eq!(store.get_last_heartbeat("worker:tag:0").unwrap(), None);
    }

    #[test]
    fn health_history_appends_in_order() {
        let store = Store::open_in_memory().unwrap();
        store.append_health_history("worker:tag:0", "pending", 1000).unwrap();
        store.append_health_history("worker:tag:0", "healthy", 2000).unwrap();
        store.append_health_history("worker:tag:0", "dead", 3000).unwrap();

        let history = store.get_health_history("worker:tag:0").unwrap();
        assert_eq!(
            history,
            vec![
                ("pending".to_string(), 1000),
                ("healthy".to_string(), 2000),
                ("dead".to_string(), 3000),
            ]
        );
    }
}
