//! CLI definition using clap derive, modeled on the teacher's
//! `agtmux-runtime/src/cli.rs`.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tagfleet", about = "Discovery worker supervision core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the supervisor: admission control, worker fleet, health monitor.
    /// Blocks until ctrl-c / SIGTERM.
    Serve(ServeOpts),
    /// Print the cached tier decision and coordination-store summary as JSON.
    Status(StatusOpts),
}

#[derive(clap::Args)]
pub struct ServeOpts {
    /// SQLite coordination database path, shared with spawned workers.
    #[arg(long, env = "TAGFLEET_DB_PATH", default_value = "./tagfleet.db")]
    pub db_path: String,

    /// Directory holding the models a worker's `FileProcessor` loads.
    #[arg(long, env = "TAGFLEET_MODELS_DIR", default_value = "./models")]
    pub models_dir: String,

    /// Path to the `tagfleet-worker` binary. Defaults to a sibling of this
    /// binary's own executable path.
    #[arg(long, env = "TAGFLEET_WORKER_BINARY")]
    pub worker_binary: Option<String>,

    /// Maximum worker fleet size the tier planner may select.
    #[arg(long, env = "TAGFLEET_WORKER_COUNT", default_value_t = 4)]
    pub worker_count: u32,

    /// VRAM budget in MB available to the worker fleet.
    #[arg(long, env = "TAGFLEET_VRAM_BUDGET_MB", default_value_t = 16_384)]
    pub vram_budget_mb: u64,

    /// RAM budget in MB available to the worker fleet.
    #[arg(long, env = "TAGFLEET_RAM_BUDGET_MB", default_value_t = 16_384)]
    pub ram_budget_mb: u64,

    /// How the resource probe determines available RAM: auto, cgroup, host.
    #[arg(long, env = "TAGFLEET_RAM_DETECTION_MODE", default_value = "auto")]
    pub ram_detection_mode: String,

    /// Disable admission control and start `worker_count` workers directly
    /// at Tier FAST_PATH.
    #[arg(long, env = "TAGFLEET_RESOURCE_MANAGEMENT_DISABLED")]
    pub disable_resource_management: bool,

    /// Stale-claim heartbeat timeout in milliseconds.
    #[arg(long, env = "TAGFLEET_HEARTBEAT_TIMEOUT_MS", default_value_t = 30_000)]
    pub heartbeat_timeout_ms: u64,
}

#[derive(clap::Args)]
pub struct StatusOpts {
    /// SQLite coordination database path to read.
    #[arg(long, env = "TAGFLEET_DB_PATH", default_value = "./tagfleet.db")]
    pub db_path: String,

    /// Directory holding the models a worker's `FileProcessor` loads; used
    /// to recompute the model-set hash the cached estimate is keyed by.
    #[arg(long, env = "TAGFLEET_MODELS_DIR", default_value = "./models")]
    pub models_dir: String,

    /// VRAM budget in MB, for re-deriving the tier decision from the
    /// persisted estimate.
    #[arg(long, env = "TAGFLEET_VRAM_BUDGET_MB", default_value_t = 16_384)]
    pub vram_budget_mb: u64,

    /// RAM budget in MB, for re-deriving the tier decision.
    #[arg(long, env = "TAGFLEET_RAM_BUDGET_MB", default_value_t = 16_384)]
    pub ram_budget_mb: u64,

    /// Maximum worker fleet size, for re-deriving the tier decision.
    #[arg(long, env = "TAGFLEET_WORKER_COUNT", default_value_t = 4)]
    pub worker_count: u32,
}
