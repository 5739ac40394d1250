use std::path::PathBuf;

use freefall_config::GenericConfiguration;
use freefall_error::{generic_error, ErrorContext as _, GenericError};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

fn default_log_level() -> LogLevel {
    LogLevel("info".to_string())
}

const fn default_true() -> bool {
    true
}

const fn default_false() -> bool {
    false
}

/// Logging configuration.
///
/// Read from the top level of the application configuration, so the same keys work in the configuration file and as
/// prefixed environment variables (`log_level` / `FREEFALL_LOG_LEVEL`).
#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfiguration {
    /// Filtering directives, in `EnvFilter` syntax.
    ///
    /// Defaults to `info`.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Whether to write logs as JSON instead of the pipe-delimited text format.
    ///
    /// Defaults to `false`.
    #[serde(default = "default_false")]
    pub log_format_json: bool,

    /// Whether to write logs to standard error.
    ///
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    pub log_to_console: bool,

    /// Path of a file to append logs to.
    ///
    /// Defaults to unset, which disables file logging.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl LoggingConfiguration {
    /// Creates a new `LoggingConfiguration` instance from the given configuration.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be deserialized as `LoggingConfiguration`, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let logging_config = config.as_typed()?;
        Ok(logging_config)
    }
}

impl Default for LoggingConfiguration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format_json: default_false(),
            log_to_console: default_true(),
            log_file: None,
        }
    }
}

/// A validated set of log filtering directives.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct LogLevel(String);

impl LogLevel {
    /// Builds an `EnvFilter` from these directives.
    pub fn as_env_filter(&self) -> EnvFilter {
        EnvFilter::builder().parse_lossy(&self.0)
    }
}

impl TryFrom<String> for LogLevel {
    type Error = GenericError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.trim().is_empty() {
            return Err(generic_error!("Log level cannot be empty."));
        }

        EnvFilter::builder()
            .parse(&value)
            .error_context("Failed to parse valid log level.")?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use freefall_config::ConfigurationLoader;

    use super::*;

    #[test]
    fn defaults_apply_to_empty_configuration() {
        let config = ConfigurationLoader::default().into_generic();
        let logging = LoggingConfiguration::from_configuration(&config).unwrap();

        assert_eq!(logging.log_level, LogLevel("info".to_string()));
        assert!(!logging.log_format_json);
        assert!(logging.log_to_console);
        assert_eq!(logging.log_file, None);
    }

    #[test]
    fn reads_values_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "log_level: freefall_core=debug,warn").unwrap();
        writeln!(file, "log_format_json: true").unwrap();
        writeln!(file, "log_file: /tmp/freefall.log").unwrap();

        let config = ConfigurationLoader::default().from_yaml(file.path()).unwrap().into_generic();
        let logging = LoggingConfiguration::from_configuration(&config).unwrap();

        assert_eq!(logging.log_level, LogLevel("freefall_core=debug,warn".to_string()));
        assert!(logging.log_format_json);
        assert_eq!(logging.log_file, Some(PathBuf::from("/tmp/freefall.log")));
    }

    #[test]
    fn rejects_invalid_log_levels() {
        assert!(LogLevel::try_from(String::new()).is_err());
        assert!(LogLevel::try_from("   ".to_string()).is_err());
        assert!(LogLevel::try_from("freefall=notalevel".to_string()).is_err());
        assert!(LogLevel::try_from("debug".to_string()).is_ok());
    }
}
