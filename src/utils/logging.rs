use std::{path::Path, sync::LazyLock};

use anyhow::{anyhow, Result};
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::{
    format::FmtSpan,
    writer::{BoxMakeWriter, MakeWriterExt},
};

pub const LOG_PREFIX: &str = "nannybot";

/// Level used when neither `--verbose` nor `RUST_LOG` says otherwise. Tick failures are logged
/// as warnings, so they stay out of the user's way by default.
const QUIET_LEVEL: &str = "error";

fn filter_directive(verbose: bool, rust_log: Option<String>) -> String {
    let level = if verbose {
        LevelFilter::DEBUG.to_string()
    } else {
        rust_log.unwrap_or_else(|| QUIET_LEVEL.into())
    };
    format!("{}={level}", env!("CARGO_PKG_NAME").replace("-", "_"))
}

/// Logs always go to stderr. When `log_dir` is given they are also written to a daily rotated file
/// in it.
fn log_writer(log_dir: Option<&Path>) -> Result<BoxMakeWriter> {
    let Some(dir) = log_dir else {
        return Ok(BoxMakeWriter::new(std::io::stderr));
    };
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .max_log_files(5)
        .filename_prefix(LOG_PREFIX)
        .build(dir)?;
    Ok(BoxMakeWriter::new(std::io::stderr.and(appender)))
}

/// Installs the global subscriber.
pub fn enable_logging(log_dir: Option<&Path>, verbose: bool) -> Result<()> {
    let directive = filter_directive(verbose, std::env::var("RUST_LOG").ok());

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(directive))
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(log_writer(log_dir)?)
        .try_init()
        .map_err(|e| anyhow!("Failed to install logger {e}"))?;
    Ok(())
}

pub static TEST_LOGGING: LazyLock<()> = LazyLock::new(|| {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::TRACE)
        .with_test_writer()
        .pretty()
        .init()
});
