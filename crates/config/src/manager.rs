//! Configuration manager
//!
//! Wraps a layered [`config::Config`] and the typed
//! [`OrchestratorSettings`] deserialised from it.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use std::time::Duration;
use tracing::{debug, info};

use common::error::Error;

use crate::settings::OrchestratorSettings;
use crate::validation::validate;

/// Prefix of environment variables recognised by the orchestrator
pub const ENV_PREFIX: &str = "SESSIOND";

/// Configuration manager
pub struct ConfigManager {
    /// Merged raw configuration
    config: Config,

    /// Typed view of `config`
    settings: OrchestratorSettings,
}

impl ConfigManager {
    /// Loads defaults, then `path` (if any), then `SESSIOND_*` variables
    pub fn new(path: Option<&str>) -> Result<Self> {
        Self::load(path, ENV_PREFIX)
    }

    /// Loads configuration using a custom environment prefix
    pub fn load(path: Option<&str>, env_prefix: &str) -> Result<Self> {
        let defaults = Config::try_from(&OrchestratorSettings::default())
            .context("failed to build default configuration")?;

        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = path {
            info!("Loading configuration from {}", path);
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("failed to load configuration")?;
        let settings: OrchestratorSettings = config
            .clone()
            .try_deserialize()
            .context("failed to parse configuration")?;

        validate(&settings).map_err(|e| Error::Config(e.to_string()))?;

        debug!("Configuration loaded: {:?}", settings);

        Ok(Self { config, settings })
    }

    /// Builds a manager around already-typed settings
    pub fn from_settings(settings: OrchestratorSettings) -> Result<Self> {
        validate(&settings).map_err(|e| Error::Config(e.to_string()))?;

        let config = Config::builder()
            .add_source(Config::try_from(&settings).context("failed to convert settings")?)
            .build()
            .context("failed to build configuration")?;

        Ok(Self { config, settings })
    }

    /// Typed settings
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Gets a string value
    pub fn get_string(&self, key: &str) -> Result<String> {
        self.config
            .get_string(key)
            .map_err(|e| Error::Config(format!("{}: {}", key, e)).into())
    }

    /// Gets a boolean value
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.config
            .get_bool(key)
            .map_err(|e| Error::Config(format!("{}: {}", key, e)).into())
    }

    /// Gets a non-negative integer value
    pub fn get_usize(&self, key: &str) -> Result<usize> {
        let value = self
            .config
            .get_int(key)
            .map_err(|e| Error::Config(format!("{}: {}", key, e)))?;

        usize::try_from(value)
            .map_err(|_| Error::Config(format!("{}: expected a non-negative integer, got {}", key, value)).into())
    }

    /// Gets a duration stored as (fractional) seconds
    pub fn get_duration(&self, key: &str) -> Result<Duration> {
        let secs = self
            .config
            .get_float(key)
            .map_err(|e| Error::Config(format!("{}: {}", key, e)))?;

        if !secs.is_finite() || secs < 0.0 {
            return Err(Error::Config(format!("{}: invalid duration {}", key, secs)).into());
        }

        Ok(Duration::from_secs_f64(secs))
    }
}
