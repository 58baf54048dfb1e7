//! Tracing setup for the embedding service: daily-rolling file plus stdout,
//! level taken from `RUST_LOG` when set.

use std::fs;
use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Call once at process start; keep the
/// returned guard alive for the process lifetime or buffered log lines are
/// lost on shutdown.
pub fn init(log_dir: &Path) -> WorkerGuard {
    let _ = fs::create_dir_all(log_dir);

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "mailsift.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(non_blocking.and(std::io::stdout))
        .with_ansi(false)
        .with_target(true)
        .init();

    info!("logging initialized, log directory: {log_dir:?}");
    guard
}
