use thiserror::Error;

use super::storage::StorageError;
use crate::buffer::PersistenceError;
use crate::config::LoadError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}

impl From<LoadError> for InfraError {
    fn from(error: LoadError) -> Self {
        Self::configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_errors_become_configuration_errors() {
        let error = InfraError::from(LoadError::Invalid {
            key: "jobs.max_concurrent",
            reason: "must be greater than zero".to_string(),
        });
        assert_eq!(
            error.to_string(),
            "configuration error: invalid configuration for `jobs.max_concurrent`: must be greater than zero"
        );
    }
}
