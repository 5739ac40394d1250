//! Logging.

use std::{
    fmt,
    io::IsTerminal as _,
    path::{Path, PathBuf},
};

use freefall_error::{generic_error, ErrorContext as _, GenericError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, Layer as _};

mod config;
pub use self::config::{LogLevel, LoggingConfiguration};

mod layer;
use self::layer::{build_formatting_layer, ProcessNameLayer};

/// Flushes buffered log output when dropped.
///
/// Must be held until the application is about to exit.
#[derive(Default)]
pub struct LoggingGuard {
    worker_guards: Vec<WorkerGuard>,
}

impl LoggingGuard {
    fn add_worker_guard(&mut self, guard: WorkerGuard) {
        self.worker_guards.push(guard);
    }
}

impl fmt::Debug for LoggingGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingGuard")
            .field("outputs", &self.worker_guards.len())
            .finish()
    }
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Console output goes to standard error, leaving standard output to the application. Both the console and the log
/// file (if configured) are written from background threads. The returned [`LoggingGuard`] must be held until the
/// application is about to exit, so that pending logs are flushed.
///
/// # Errors
///
/// If the log file cannot be opened, or the logging subsystem was already initialized, an error is returned.
pub fn initialize_logging(config: &LoggingConfiguration) -> Result<LoggingGuard, GenericError> {
    let mut configured_layers = Vec::new();
    let mut logging_guard = LoggingGuard::default();

    if config.log_to_console {
        let with_ansi = std::io::stderr().is_terminal();
        let (nb_stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
        logging_guard.add_worker_guard(guard);

        configured_layers.push(build_formatting_layer(config, nb_stderr, with_ansi));
    }

    if let Some(log_file) = &config.log_file {
        let (directory, file_name) = split_log_file_path(log_file)?;
        std::fs::create_dir_all(&directory)
            .with_error_context(|| format!("Failed to create log directory '{}'.", directory.display()))?;

        let appender = tracing_appender::rolling::never(directory, file_name);
        let (nb_appender, guard) = tracing_appender::non_blocking(appender);
        logging_guard.add_worker_guard(guard);

        configured_layers.push(build_formatting_layer(config, nb_appender, false));
    }

    // A `Vec` of layers acts as a fanout, so filtering it once covers every output.
    tracing_subscriber::registry()
        .with(ProcessNameLayer)
        .with(configured_layers.with_filter(config.log_level.as_env_filter()))
        .try_init()
        .error_context("Failed to install global tracing subscriber.")?;

    Ok(logging_guard)
}

fn split_log_file_path(path: &Path) -> Result<(PathBuf, PathBuf), GenericError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| generic_error!("Log file path '{}' does not name a file.", path.display()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Ok((directory, PathBuf::from(file_name)))
}
