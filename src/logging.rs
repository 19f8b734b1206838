//! Tracing bootstrap.

use std::env;
use std::fs;
use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

const DEFAULT_FILTER: &str = "info,definy_sync=debug";

/// Install the global subscriber.
///
/// Filter precedence:
/// 1) `RUST_LOG`
/// 2) `DEFINY_SYNC_LOG`
/// 3) `log.filter` from the config file
/// 4) internal default filter
///
/// With `log.file` set, output goes to that file through a background writer;
/// keep the returned guard alive until exit so buffered lines are flushed.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
  let env_filter = resolve_filter(
    env::var("RUST_LOG").ok(),
    env::var("DEFINY_SYNC_LOG").ok(),
    config.filter.as_deref(),
  );

  let Some(path) = &config.file else {
    let _ = tracing_subscriber::fmt()
      .with_target(true)
      .with_env_filter(env_filter)
      .with_writer(std::io::stderr)
      .try_init();
    return Ok(None);
  };

  let file_name = path
    .file_name()
    .ok_or_else(|| eyre!("Log file path has no file name: {}", path.display()))?;
  let dir = path
    .parent()
    .filter(|dir| !dir.as_os_str().is_empty())
    .unwrap_or(Path::new("."));
  fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
  let _ = tracing_subscriber::fmt()
    .with_target(true)
    .with_thread_ids(true)
    .with_ansi(false)
    .with_env_filter(env_filter)
    .with_writer(writer)
    .try_init();
  Ok(Some(guard))
}

/// The first non-empty, parseable candidate wins.
fn resolve_filter(
  rust_log: Option<String>,
  app_log: Option<String>,
  configured: Option<&str>,
) -> EnvFilter {
  [rust_log, app_log, configured.map(str::to_string)]
    .into_iter()
    .flatten()
    .filter(|value| !value.trim().is_empty())
    .find_map(|value| EnvFilter::try_new(value).ok())
    .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
