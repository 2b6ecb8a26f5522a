//! CLI definition for the discovery worker subprocess, using clap derive.
//!
//! The supervisor spawns one of these per worker slot with a stable,
//! index-derived `--worker-id`; there is no interactive use of this binary.

use clap::Parser;

#[derive(Parser)]
#[command(name = "tagfleet-worker", about = "Discovery worker subprocess")]
pub struct Cli {
    /// Stable component id, e.g. "worker:tag:0".
    #[arg(long)]
    pub worker_id: String,

    /// SQLite database path, shared with the supervisor.
    #[arg(long)]
    pub db_path: String,

    /// Models directory, consulted by the injected file processor.
    #[arg(long)]
    pub models_dir: String,

    /// Execution tier the supervisor selected for this worker (informational).
    #[arg(long)]
    pub tier: Option<String>,

    /// Whether the supervisor's tier selection prefers GPU execution.
    #[arg(long)]
    pub prefer_gpu: bool,
}
