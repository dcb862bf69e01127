use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {code} - {message}")]
    ApiError { code: i32, message: String },

    /// A payload did not match the expected schema.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A caller-supplied argument the exchange would reject.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    /// Transport-level failure of the streaming socket.
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection timeout: {0}")]
    ConnectionTimeout(String),

    /// The caller stopped the stream on purpose.
    #[error("Stream cancelled")]
    Cancelled,
}

impl ExchangeError {
    /// Transport failures are absorbed by the stream session and retried.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::ConnectionTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ExchangeError::ApiError {
            code: -1121,
            message: "Invalid symbol.".to_string(),
        };
        assert_eq!(err.to_string(), "API error: -1121 - Invalid symbol.");
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(ExchangeError::NetworkError("reset".to_string()).is_connection_error());
        assert!(ExchangeError::ConnectionTimeout("slow".to_string()).is_connection_error());
        assert!(!ExchangeError::Cancelled.is_connection_error());
        assert!(!ExchangeError::ConfigurationError("x".to_string()).is_connection_error());
    }
}
