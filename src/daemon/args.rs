use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

pub const DEFAULT_PORT: u16 = 37177;

/// Personal punch clock tracking work and rest time.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct DaemonArgs {
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// SQLite database for the daily totals. Nothing is persisted without it.
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Directory for logs and the instance lock.
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Also print logs to stdout.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
}
