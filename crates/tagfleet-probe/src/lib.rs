//! tagfleet-probe: GPU/RAM telemetry and capacity measurement.
//!
//! Everything here does real IO (subprocess calls, `/sys/fs/cgroup` reads,
//! filesystem walks) and is async where the corresponding syscall can
//! block, mirroring the teacher's `tokio::process`-based subprocess clients.

pub mod capacity;
pub mod error;
pub mod gpu;
pub mod ram;
pub mod resource;

pub use error::ProbeError;
pub use resource::ResourceProbe;
