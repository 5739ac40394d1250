use std::{collections::BTreeMap, path::Path};

use freefall_config::{ConfigurationLoader, GenericConfiguration};
use freefall_core::fall::GravityTable;
use freefall_error::{ErrorContext as _, GenericError};

/// Configuration file read when `--config` is not given. A missing file is not an error.
pub const DEFAULT_CONFIG_PATH: &str = "freefall.yaml";

const ENVIRONMENT_PREFIX: &str = "FREEFALL";

const DEFAULT_COORDINATOR_NAME: &str = "coordinator";

/// Loads the configuration from the configuration file and the environment.
///
/// Environment variables (`FREEFALL_*`) take precedence over the file. When `path` is given the file must exist,
/// otherwise [`DEFAULT_CONFIG_PATH`] is read if present.
///
/// # Errors
///
/// If `path` is given but cannot be read, or the environment cannot be read, an error is returned.
pub fn load_configuration(path: Option<&Path>) -> Result<GenericConfiguration, GenericError> {
    let loader = ConfigurationLoader::default();
    let loader = match path {
        Some(path) => loader
            .from_yaml(path)
            .with_error_context(|| format!("Failed to load configuration file '{}'.", path.display()))?,
        None => loader.try_from_yaml(DEFAULT_CONFIG_PATH),
    };

    let configuration = loader
        .from_environment(ENVIRONMENT_PREFIX)
        .error_context("Failed to load configuration from environment.")?
        .into_generic();
    Ok(configuration)
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct FreefallConfiguration {
    coordinator_name: String,
    bodies: BTreeMap<String, f64>,
}

impl FreefallConfiguration {
    /// Creates a new `FreefallConfiguration` instance from the given configuration.
    ///
    /// # Errors
    ///
    /// If a value is present but has the wrong type, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(Self {
            coordinator_name: config
                .try_get_typed("coordinator_name")?
                .unwrap_or_else(|| DEFAULT_COORDINATOR_NAME.to_string()),
            bodies: config.try_get_typed("bodies")?.unwrap_or_default(),
        })
    }

    /// Returns the name the coordinator process runs under.
    pub fn coordinator_name(&self) -> &str {
        &self.coordinator_name
    }

    /// Builds the gravity table: the built-in bodies, extended or overridden by the configured ones.
    ///
    /// # Errors
    ///
    /// If a configured acceleration is not a finite, positive number, an error is returned.
    pub fn gravity_table(&self) -> Result<GravityTable, GenericError> {
        let mut table = GravityTable::default();
        for (body, acceleration) in &self.bodies {
            table
                .insert(body.clone(), *acceleration)
                .with_error_context(|| format!("Invalid gravity configuration for body '{}'.", body))?;
        }
        Ok(table)
    }
}
