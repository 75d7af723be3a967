//! Command-line surface for the scheduler daemon.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "skywatch-scheduler")]
#[command(about = "Control-plane daemon for a robotic telescope array")]
pub struct Args {
    /// Disable TLS and talk plain HTTP to every telescope controller.
    #[arg(long)]
    pub debug: bool,

    /// Path to the observatory config JSON. Defaults to the value of
    /// SCHEDULER_CONFIG, or ./observatories.json.
    #[arg(long, env = "SCHEDULER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Raise the log level; repeat for more verbosity. Overridden by
    /// RUST_LOG/SCHEDULER_LOG when set.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
