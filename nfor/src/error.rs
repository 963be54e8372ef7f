//! Configuration errors. Pipeline preconditions panic instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse denoise config: {0}")]
    Yaml(#[from] serde_yml::Error),

    #[error("Invalid denoise config: {0}")]
    Invalid(String),
}
