//! Command handlers.

use anyhow::Context;
use std::path::Path;
use tracing::info;

use procfleet_core::Settings;
use procfleet_runtime::{LogTransferConfig, LogTransferManager};

use crate::parser::LogSinkArgs;

/// Run a self-spawned log sink until Ctrl-C, then dispose of it.
pub async fn log_sink(args: LogSinkArgs) -> anyhow::Result<()> {
    let mut config = LogTransferConfig::self_spawned(args.ip, &args.target_dir);
    config.user = args.user;
    config.password = args.password;

    let mut manager = LogTransferManager::new(config)?;
    let port = manager
        .server_start()
        .await
        .context("failed to start log sink")?;

    println!("Log sink listening on {}:{port}", args.ip);
    println!("  target dir:  {}", args.target_dir.display());
    println!("  user:        {}", manager.user().unwrap_or_default());
    println!("  password:    {}", manager.password().unwrap_or_default());
    if let Some(path) = manager.ca_certificate_path() {
        println!("  certificate: {}", path.display());
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Interrupted, stopping log sink");

    manager.dispose(&[], false).await?;
    Ok(())
}

/// Settings from `file`, or the defaults.
pub fn load_settings(file: Option<&Path>) -> anyhow::Result<Settings> {
    match file {
        Some(path) => Ok(Settings::load(path)?),
        None => Ok(Settings::with_defaults()),
    }
}

/// Print the effective settings as JSON.
pub fn show_settings(file: Option<&Path>) -> anyhow::Result<()> {
    let settings = load_settings(file)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
