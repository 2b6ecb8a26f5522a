//! Persistence for the worker supervision core: capacity probe locks and
//! estimates, file claims, restart-policy counters, and worker health.
//!
//! Everything here is a thin, synchronous SQLite layer. Callers on the
//! async side wrap these calls in `spawn_blocking` as needed; this crate
//! does not itself depend on tokio.

pub mod capacity;
pub mod claims;
pub mod error;
pub mod flags;
pub mod health;
pub mod restart;
pub mod store;

pub use capacity::ProbeLockStatus;
pub use error::{Result, StoreError};
pub use store::Store;
