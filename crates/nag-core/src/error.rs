//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating the monitor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration {value:?} for {field}")]
    InvalidDuration { field: String, value: String },

    #[error("duplicate target name: {0}")]
    DuplicateTarget(String),

    #[error("tier refers to undeclared channel: {0}")]
    UnknownChannel(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
