//! Optional settings for binaries that source a default bound from the environment.
//!
//! The engine itself never reads the environment. [`Settings::from_env`]
//! reads `FANOUT__CONCURRENCY` and `FANOUT__CAPTURE_STACK`.
//!
//! # Example
//!
//! ```no_run
//! use fanout::{Executor, Settings};
//!
//! let settings = Settings::from_env().expect("Failed to load configuration");
//! let executor = Executor::from_settings(&settings);
//! ```

use std::num::NonZeroUsize;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Engine settings.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Default concurrency bound (default: available parallelism)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Capture a stack when recovering a panic (default: true)
    #[serde(default = "default_true")]
    pub capture_stack: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            capture_stack: default_true(),
        }
    }
}

impl Settings {
    /// Loads settings from `FANOUT__*` environment variables over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix("FANOUT").separator("__"))
    }

    /// Loads settings from the given environment source over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result is invalid.
    pub fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        let settings: Self = Config::builder()
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the loaded values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Message`] when `concurrency` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Message(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

fn default_true() -> bool {
    true
}
