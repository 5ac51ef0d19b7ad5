//! Tracing initialization: console output plus a daily rolling run log,
//! mirroring the log file the operators replay skipped identifiers from.

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. The returned guard must stay alive for
/// the duration of the process or buffered file output is lost.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
    let file_appender = tracing_appender::rolling::daily(log_dir, "supply-certis.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .try_init()?;

    Ok(guard)
}
