use anyhow::Result;
use clap::Parser;
use punchclock::{
    daemon::{args::DaemonArgs, start_daemon},
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, LOG_PREFIX},
        runtime::multi_thread_runtime,
    },
};
use tracing::error;

fn main() -> Result<()> {
    let args = DaemonArgs::parse();

    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;
    enable_logging(LOG_PREFIX, &app_dir.join("logs"), args.log, args.log_console)?;

    multi_thread_runtime()?
        .block_on(start_daemon(&app_dir, args.port, args.db.as_deref()))
        .inspect_err(|e| error!("Daemon failed {e:?}"))
}
