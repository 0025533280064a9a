use crate::rules::{BlobError, RuleStoreError};
use thiserror::Error;

/// Warden application error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },

    #[error("Rule source error: {0}")]
    RuleSource(#[from] BlobError),

    #[error("Rule store error: {0}")]
    RuleStore(#[from] RuleStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Service {name} failed: {reason}")]
    Service { name: String, reason: String },
}

impl Error {
    pub fn invalid_setting(field: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidSetting {
            field: field.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
