//! A single persisted boolean flag: whether the worker system is enabled.
//!
//! Separate from `CoreConfig` because it is a runtime toggle an operator
//! flips (via the admin surface, not a config file reload) and must survive
//! across supervisor restarts independently of whatever static config the
//! process was started with.

use rusqlite::{params, OptionalExtension};

use crate::error::Result;
use crate::store::Store;

const WORKER_ENABLED_KEY: &str = "worker_enabled";

impl Store {
    /// Defaults to `true` when the flag has never been set.
    pub fn is_worker_system_enabled(&self) -> Result<bool> {
        let value: Option<i64> = self
            .conn
            .query_row(
                "SELECT flag_value FROM supervisor_flags WHERE flag_key = ?1",
                params![WORKER_ENABLED_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(1) != 0)
    }

    pub fn set_worker_system_enabled(&self, enabled: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO supervisor_flags (flag_key, flag_value) VALUES (?1, ?2)
             ON CONFLICT(flag_key) DO UPDATE SET flag_value = excluded.flag_value",
            params![WORKER_ENABLED_KEY, i64::from(enabled)],
        )?;
        Ok(())
    }
}
