//! `procfleet` entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use procfleet_cli::{Cli, Commands, handlers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads its env fallbacks
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::LogSink(args) => handlers::log_sink(args).await,
        Commands::Settings { file } => handlers::show_settings(file.as_deref()),
    }
}
