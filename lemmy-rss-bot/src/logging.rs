//! 4.I Logging — one `tracing_subscriber::registry()` fanning out to three
//! sinks: stderr at the operator-chosen level, and two rotating file
//! writers that always capture DEBUG-and-up and ERROR-only respectively.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Guards returned by the non-blocking file appenders. Drop these only at
/// process exit — dropping early silently stops flushing queued log lines.
pub struct LogGuards {
    _debug_guard: WorkerGuard,
    _error_guard: WorkerGuard,
}

pub fn init(log_dir: &str) -> anyhow::Result<LogGuards> {
    std::fs::create_dir_all(log_dir)?;

    let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let debug_appender = tracing_appender::rolling::daily(Path::new(log_dir), "rssbot.debug.log");
    let (debug_writer, debug_guard) = tracing_appender::non_blocking(debug_appender);

    let error_appender = tracing_appender::rolling::never(Path::new(log_dir), "rssbot.error.log");
    let (error_writer, error_guard) = tracing_appender::non_blocking(error_appender);

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_filter(stderr_filter);

    let debug_layer = fmt::layer()
        .with_writer(debug_writer)
        .with_ansi(false)
        .with_filter(EnvFilter::new("debug"));

    let error_layer = fmt::layer()
        .with_writer(error_writer)
        .with_ansi(false)
        .with_filter(EnvFilter::new("error"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(debug_layer)
        .with(error_layer)
        .init();

    Ok(LogGuards {
        _debug_guard: debug_guard,
        _error_guard: error_guard,
    })
}
