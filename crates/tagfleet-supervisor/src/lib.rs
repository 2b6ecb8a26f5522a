//! tagfleet-supervisor: the Health Monitor reactor and the Worker Supervisor
//! that sits on top of it.
//!
//! `tagfleet-core` supplies the pure state machines (`ComponentState`,
//! `RestartPolicy`, tier selection); `tagfleet-store` supplies persistence;
//! `tagfleet-probe` supplies telemetry. This crate is where they meet the
//! async runtime: reading worker pipes, dispatching lifecycle callbacks, and
//! driving subprocess restarts.

pub mod error;
pub mod frame;
pub mod monitor;
pub mod supervisor;

pub use error::{Result, SupervisorError};
pub use frame::{parse_frame, HealthFrame, HEALTH_FRAME_PREFIX};
pub use monitor::{now_wall_ms, ComponentLifecycleHandler, HealthMonitor, StatusChangeContext};
pub use supervisor::WorkerSupervisor;
