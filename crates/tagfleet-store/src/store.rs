//! SQLite-backed persistence for the worker supervision core.
//!
//! One `Store` owns one `rusqlite::Connection`. Each coordination concern
//! (capacity probing, claims, restart policy, health history) gets its own
//! `impl Store` block in its own module, all operating on the same
//! connection.

use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

/// SQLite-backed persistence store for the supervision core's coordination
/// tables.
pub struct Store {
    pub(crate) conn: Connection,
}

impl Store {
    /// Open (or create) a database at the given filesystem path and run
    /// migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS capacity_probe_locks (
                model_set_hash  TEXT PRIMARY KEY,
                status          TEXT NOT NULL,
                worker_id       TEXT NOT NULL,
                started_at_ms   INTEGER NOT NULL,
                completed_at_ms INTEGER
            );

            CREATE TABLE IF NOT EXISTS capacity_estimates (
                model_set_hash          TEXT PRIMARY KEY,
                measured_backbone_vram_mb INTEGER NOT NULL,
                estimated_worker_ram_mb   INTEGER NOT NULL,
                gpu_capable               INTEGER NOT NULL,
                probe_duration_s          REAL NOT NULL,
                probed_by                 TEXT NOT NULL,
                created_at_ms              INTEGER NOT NULL,
                updated_at_ms               INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS worker_claims (
                claim_key   TEXT PRIMARY KEY,
                file_id     TEXT NOT NULL,
                worker_id   TEXT NOT NULL,
                claimed_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS worker_restart_policy (
                component_id        TEXT PRIMARY KEY,
                restart_count       INTEGER NOT NULL DEFAULT 0,
                last_restart_wall_ms INTEGER,
                failed_at_wall_ms   INTEGER,
                failure_reason      TEXT,
                updated_at_wall_ms  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS worker_health_history (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                component_id    TEXT NOT NULL,
                status          TEXT NOT NULL,
                recorded_at_ms  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS worker_health (
                component_id            TEXT PRIMARY KEY,
                last_heartbeat_wall_ms  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS library_files (
                file_id       TEXT PRIMARY KEY,
                needs_tagging INTEGER NOT NULL DEFAULT 1,
                is_valid      INTEGER NOT NULL DEFAULT 1,
                tagged        INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS supervisor_flags (
                flag_key    TEXT PRIMARY KEY,
                flag_value  INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }
}
