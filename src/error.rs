use thiserror::Error;

/// Errors raised by the forecasting core.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// The input cannot be used at all (bad identifiers, missing required columns).
    #[error("Data validation error: {0}")]
    DataValidation(String),

    /// Storage collaborator failure. Callers may retry.
    #[error("Database error: {0}")]
    Database(String),

    #[error("Model training error: {0}")]
    ModelTraining(String),

    #[error("Prediction error: {0}")]
    Prediction(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ForecastError {
    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ForecastError::Database(_))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ForecastError::DataValidation(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        ForecastError::ModelTraining(msg.into())
    }

    pub fn prediction(msg: impl Into<String>) -> Self {
        ForecastError::Prediction(msg.into())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(error: serde_json::Error) -> Self {
        ForecastError::Serialization(error.to_string())
    }
}

impl From<bincode::Error> for ForecastError {
    fn from(error: bincode::Error) -> Self {
        ForecastError::Serialization(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_errors_are_retryable() {
        assert!(ForecastError::Database("timeout".into()).is_retryable());
        assert!(!ForecastError::validation("bad id").is_retryable());
        assert!(!ForecastError::training("singular").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let error = ForecastError::validation("product_id must be positive");
        assert_eq!(
            error.to_string(),
            "Data validation error: product_id must be positive"
        );
    }

    #[test]
    fn test_json_errors_convert_to_serialization() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        assert!(matches!(ForecastError::from(err), ForecastError::Serialization(_)));
    }
}
