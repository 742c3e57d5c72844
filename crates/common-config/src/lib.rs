//! Shared configuration helpers for gateway services.
//!
//! Services describe their configuration as a type implementing
//! [`ServiceConfig`] and read it through a [`ConfigSource`], which is the
//! process environment in production and a plain map in tests.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Failure to build a service configuration.
///
/// Messages name the offending variable but never include a secret value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required configuration variable {0} is missing")]
    Missing(String),
    #[error("configuration variable {var} is invalid: {reason}")]
    Invalid { var: String, reason: String },
}

/// A key/value lookup that configuration is read from.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads variables from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// A configuration type that can be assembled from a [`ConfigSource`].
pub trait ServiceConfig: Sized {
    fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError>;
}

/// What happened when looking for a `.env` file.
///
/// Returned rather than logged so the caller can report it once logging is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvFile {
    Loaded(PathBuf),
    NotFound,
    Unreadable(String),
}

impl EnvFile {
    /// Emit the outcome through the installed subscriber.
    pub fn log(&self) {
        match self {
            EnvFile::Loaded(path) => {
                tracing::info!(event = "env_file_loaded", path = %path.display(), "loaded .env file")
            }
            EnvFile::NotFound => tracing::debug!(event = "env_file_absent", "no .env file found"),
            EnvFile::Unreadable(error) => {
                tracing::warn!(event = "env_file_unreadable", %error, "failed to read .env file")
            }
        }
    }
}

impl From<Result<PathBuf, dotenv::Error>> for EnvFile {
    fn from(result: Result<PathBuf, dotenv::Error>) -> Self {
        match result {
            Ok(path) => EnvFile::Loaded(path),
            Err(error) if error.not_found() => EnvFile::NotFound,
            Err(error) => EnvFile::Unreadable(error.to_string()),
        }
    }
}

/// Apply a `.env` file from the working directory (or any parent).
///
/// Variables already present in the environment take precedence over it.
pub fn load_env_file() -> EnvFile {
    dotenv::dotenv().into()
}

/// Apply the `.env` file at `path`.
pub fn load_env_file_from(path: &Path) -> EnvFile {
    dotenv::from_path(path)
        .map(|()| path.to_path_buf())
        .into()
}

/// Build a service configuration from the process environment.
pub fn load<T: ServiceConfig>() -> Result<T, ConfigError> {
    T::from_source(&ProcessEnv)
}

/// Fetch a variable that must be present and non-blank.
pub fn required(source: &dyn ConfigSource, var: &str) -> Result<String, ConfigError> {
    optional(source, var).ok_or_else(|| ConfigError::Missing(var.to_string()))
}

/// Fetch a variable, treating a blank value as absent.
pub fn optional(source: &dyn ConfigSource, var: &str) -> Option<String> {
    source
        .get(var)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse a variable into `T`, falling back to `default` when it is absent.
pub fn parse_or<T>(source: &dyn ConfigSource, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(source, var) {
        Some(value) => value.parse::<T>().map_err(|error| ConfigError::Invalid {
            var: var.to_string(),
            reason: error.to_string(),
        }),
        None => Ok(default),
    }
}

/// Read a boolean flag. Only `true` (any case) enables it.
pub fn flag(source: &dyn ConfigSource, var: &str, default: bool) -> bool {
    optional(source, var)
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
