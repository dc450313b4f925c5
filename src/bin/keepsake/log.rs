// Keepsake backup system.

//! Logging setup: terminal output plus optional log files.

use std::path::PathBuf;

use tracing::metadata::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::Registry;

pub struct LoggingOptions {
    /// Full log file.
    pub file: Option<PathBuf>,
    /// Extra file receiving only warnings and errors.
    pub error_file: Option<PathBuf>,
    pub debug: bool,
}

/// Guards all logging activity. Dropping it flushes pending writes and
/// closes the log files.
pub struct LogGuard {
    _worker_guards: Vec<WorkerGuard>,
}

fn file_layer<S>(
    path: &std::path::Path,
    level: LevelFilter,
    guards: &mut Vec<WorkerGuard>,
) -> Result<impl tracing_subscriber::Layer<S>, String>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let directory = path.parent().ok_or("can't resolve log file directory")?;
    let directory = if directory.as_os_str().is_empty() {
        std::path::Path::new(".")
    } else {
        directory
    };
    let file_name = path
        .file_name()
        .ok_or("can't get log file name")?
        .to_string_lossy()
        .to_string();
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        directory, file_name,
    ));
    guards.push(guard);
    Ok(fmt::Layer::default()
        .with_ansi(false)
        .with_target(false)
        .with_writer(writer)
        .with_filter(level))
}

pub fn init(options: LoggingOptions) -> Result<LogGuard, String> {
    let level = if options.debug {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    let mut guards = Vec::new();

    let terminal = fmt::Layer::default()
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(level);

    let log_file = options
        .file
        .as_deref()
        .map(|path| file_layer(path, level, &mut guards))
        .transpose()?;
    let error_file = options
        .error_file
        .as_deref()
        .map(|path| file_layer(path, LevelFilter::WARN, &mut guards))
        .transpose()?;

    Registry::default()
        .with(terminal)
        .with(log_file)
        .with(error_file)
        .try_init()
        .map_err(|_| "Failed to set the global default logger".to_string())?;

    Ok(LogGuard {
        _worker_guards: guards,
    })
}
