use color_eyre::{eyre::eyre, Result};
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LOG_FILE_PREFIX: &str = "tapestry.log";

/// Install the global subscriber: stderr plus a daily log file in `log_dir`.
///
/// `RUST_LOG` controls the level; the default is `info` for this crate and
/// `warn` for everything else. Keep the returned guard alive until exit or
/// buffered file output is lost.
pub fn init_tracing(log_dir: &Path) -> Result<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new("warn,tapestry_cache=info,tapestry=info"));

  let file_appender = RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix(LOG_FILE_PREFIX)
    .build(log_dir)
    .map_err(|e| eyre!("Failed to open log directory {}: {}", log_dir.display(), e))?;
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(io::stderr))
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}
