use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `PRECACHE_LOG=debug`.
const LOG_ENV: &str = "PRECACHE_LOG";

/// Install the global subscriber, writing to stderr so stdout stays free for bodies.
///
/// Keep the returned guard alive for the life of the program or buffered lines are lost.
pub fn init() -> Result<WorkerGuard> {
  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
  let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_target(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
