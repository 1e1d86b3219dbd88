//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("duplicate resource manager: {0}")]
    DuplicateResourceManager(String),

    #[error("node {node} references unknown resource manager {rm}")]
    UnknownResourceManager { node: String, rm: String },
}
