//! Tracing subscriber setup.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Console logging filtered by `RUST_LOG` or `level`, plus a daily-rolling
/// `shortbot.log` under `log_dir` when one is given. Keep the returned guard
/// alive for the life of the process or buffered file lines are lost.
///
/// Calling this twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_tracing(level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_target(true);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "shortbot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = fmt::layer().with_ansi(false).with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file)
                .try_init()
                .ok()
                .map(|()| guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .try_init()
                .ok();
            None
        }
    }
}
