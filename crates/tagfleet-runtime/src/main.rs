//! tagfleet: discovery worker supervision core binary.

use clap::Parser;

mod cli;
mod config;
mod serve;
mod status;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("TAGFLEET_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    match args.command {
        cli::Command::Serve(opts) => serve::run(opts).await,
        cli::Command::Status(opts) => status::run(opts).await,
    }
}
