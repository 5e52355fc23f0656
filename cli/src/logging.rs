use std::path::Path;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_ENV: &str = "KEEPER_LOG";

/// Install stderr logging, plus a daily log file when `log_dir` is set.
/// Keep the returned guard alive until exit so the file layer flushes.
pub fn init_logger(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter_layer = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "keeper.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(file_layer)
        .with(filter_layer)
        .try_init();

    if installed.is_ok() {
        debug!(file_logging = log_dir.is_some(), "logging configured");
    }
    guard
}
