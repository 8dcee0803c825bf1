//! Command-line definition.

use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "procfleet")]
#[command(about = "Supervise component processes and collect their logs")]
#[command(version)]
pub struct Cli {
    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a TLS log sink until interrupted
    LogSink(LogSinkArgs),

    /// Print the effective supervision and transfer settings
    Settings {
        /// Settings JSON file to load instead of the defaults
        #[arg(long, env = "PROCFLEET_SETTINGS")]
        file: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct LogSinkArgs {
    /// Address to listen on; also the certificate's subject
    #[arg(long, env = "PROCFLEET_SINK_IP")]
    pub ip: IpAddr,

    /// Directory uploaded files are written to
    #[arg(long = "target-dir", env = "PROCFLEET_SINK_DIR")]
    pub target_dir: PathBuf,

    /// User clients must present (generated if omitted)
    #[arg(long, env = "PROCFLEET_SINK_USER")]
    pub user: Option<String>,

    /// Password clients must present (generated if omitted)
    #[arg(long, env = "PROCFLEET_SINK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}
