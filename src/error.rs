use thiserror::Error;

/// Process-level failures. Anything that only affects one account or one
/// camera is handled inside the services and never reaches this type.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Configuration error: {0}")]
    Configuration(anyhow::Error),
}

impl From<config::ConfigError> for JobError {
    fn from(err: config::ConfigError) -> Self {
        JobError::Configuration(anyhow::Error::new(err))
    }
}

impl From<reqwest::Error> for JobError {
    fn from(err: reqwest::Error) -> Self {
        JobError::Configuration(anyhow::Error::new(err))
    }
}
