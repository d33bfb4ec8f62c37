//! Configuration parser for loading configuration and variable files.
//!
//! This module handles loading the configuration document (YAML or JSON),
//! `.env` files, `--var` assignments and variable files.

use crate::error::{ConfigError, InfraError, Result};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::Configuration;
use super::value::Value;

/// Prefix of environment variables that supply variable values.
pub const VAR_ENV_PREFIX: &str = "INFRAGRAPH_VAR_";

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["infragraph.yaml", "infragraph.yml", "infragraph.json"];

/// Configuration parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML or JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Configuration> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = read_file(path)?;
        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// JSON is accepted too, as a subset of YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Configuration> {
        debug!("Parsing configuration document");
        let location = source.map(|p| p.display().to_string());

        // Enums and expressions are resolved from the JSON data model so that
        // YAML and JSON documents share one shape.
        let document: JsonValue = serde_yaml::from_str(content).map_err(|e| {
            InfraError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: location.clone(),
            })
        })?;

        let config: Configuration = serde_json::from_value(document).map_err(|e| {
            InfraError::Config(ConfigError::ParseError {
                message: e.to_string(),
                location,
            })
        })?;

        debug!(
            "Parsed configuration for project {}: {} variables, {} resources, {} outputs",
            config.project.name,
            config.variables.len(),
            config.resources.len(),
            config.outputs.len()
        );
        Ok(config)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                InfraError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Loads variable values from a YAML or JSON map.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a map.
    pub fn load_var_file(&self, path: impl AsRef<Path>) -> Result<BTreeMap<String, Value>> {
        let path = path.as_ref();
        debug!("Loading variables from: {}", path.display());

        let content = read_file(path)?;
        let parsed: BTreeMap<String, JsonValue> = serde_yaml::from_str(&content).map_err(|e| {
            InfraError::Config(ConfigError::ParseError {
                message: format!("Invalid variable file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        Ok(parsed.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
    }
}

/// Parses a `name=value` assignment from the command line.
///
/// The value stays a string; it is coerced to the declared type on binding.
///
/// # Errors
///
/// Returns an error if the assignment has no `=` or an empty name.
pub fn parse_var_assignment(raw: &str) -> Result<(String, Value)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), Value::from(value)))
        }
        _ => Err(InfraError::Config(ConfigError::ParseError {
            message: format!("Invalid variable assignment '{raw}', expected name=value"),
            location: None,
        })),
    }
}

/// Reads a variable value from the process environment (`INFRAGRAPH_VAR_<name>`).
#[must_use]
pub fn env_variable(name: &str) -> Option<String> {
    std::env::var(format!("{VAR_ENV_PREFIX}{name}")).ok()
}

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(InfraError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(InfraError::Config(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }));
    }

    std::fs::read_to_string(path).map_err(|e| {
        InfraError::Config(ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })
    })
}
