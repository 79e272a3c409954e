use std::{path::Path, sync::LazyLock};

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{Rotation, RollingFileAppender};
use tracing_subscriber::{
    fmt::{format::FmtSpan, writer::MakeWriterExt},
    EnvFilter,
};

pub const LOG_PREFIX: &str = "punchclock";

const MAX_LOG_FILES: usize = 5;
const DEFAULT_LEVEL: &str = "debug";

/// Logs to daily rotated files in `log_dir`, and to stdout if `show_std` is set.
pub fn enable_logging(
    prefix: &str,
    log_dir: &Path,
    log_level: Option<LevelFilter>,
    show_std: bool,
) -> Result<()> {
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(prefix)
        .build(log_dir)?;

    let stdout = std::io::stdout.with_filter(move |_| show_std);

    tracing_subscriber::fmt()
        .with_env_filter(crate_filter(log_level, std::env::var("RUST_LOG").ok()))
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(stdout.and(appender))
        .pretty()
        .init();
    Ok(())
}

/// Only this crate's events pass. An explicit level beats `RUST_LOG`.
fn crate_filter(log_level: Option<LevelFilter>, env_level: Option<String>) -> EnvFilter {
    let level = log_level
        .map(|v| v.to_string())
        .or(env_level)
        .unwrap_or_else(|| DEFAULT_LEVEL.into());
    EnvFilter::new(format!(
        "{}={level}",
        env!("CARGO_PKG_NAME").replace("-", "_")
    ))
}

pub static TEST_LOGGING: LazyLock<()> = LazyLock::new(|| {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .pretty()
        .init()
});

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::crate_filter;

    #[test]
    fn test_filter_precedence() {
        assert_eq!(
            crate_filter(Some(LevelFilter::WARN), Some("trace".into())).to_string(),
            "punchclock=warn"
        );
        assert_eq!(
            crate_filter(None, Some("info".into())).to_string(),
            "punchclock=info"
        );
        assert_eq!(crate_filter(None, None).to_string(), "punchclock=debug");
    }
}
