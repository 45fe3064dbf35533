//! Configuration Error Types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A source could not be read or did not deserialize into `EngineConfig`
    #[error("Failed to load configuration for environment '{environment}': {error}")]
    LoadFailed { environment: String, error: String },

    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },
}

impl ConfigurationError {
    pub fn load_failed(environment: impl Into<String>, error: impl ToString) -> Self {
        Self::LoadFailed {
            environment: environment.into(),
            error: error.to_string(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }

    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
