//! Custom error types for pubtrack.
//!
//! All fallible library functions return `Result<T, PubtrackError>` instead of
//! using `unwrap()`. Failures of a single researcher or document are logged and
//! counted by the pipeline; they never abort a run.

use thiserror::Error;

/// Main error type for pubtrack operations.
#[derive(Debug, Error)]
pub enum PubtrackError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// HTML or record parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limited by external service
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External service returned a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: i32,
        /// Error message
        message: String,
    },

    /// CAPTCHA or bot wall served instead of content
    #[error("CAPTCHA detected, please refresh cookies")]
    Captcha,

    /// Bounded wait elapsed
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Interactive session failure (missing control, unexpected page)
    #[error("Session error: {0}")]
    Session(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl PubtrackError {
    /// Whether this error came from talking to an external service.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PubtrackError::Network(_)
                | PubtrackError::RateLimited(_)
                | PubtrackError::Api { .. }
                | PubtrackError::Timeout(_)
                | PubtrackError::Captcha
        )
    }
}

/// Result type alias using `PubtrackError`
pub type Result<T> = std::result::Result<T, PubtrackError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| PubtrackError::Parse(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(PubtrackError::RateLimited(60).is_transport());
        assert!(PubtrackError::Captcha.is_transport());
        assert!(!PubtrackError::Parse("bad".to_string()).is_transport());
        assert!(!PubtrackError::Config("bad".to_string()).is_transport());
    }

    #[test]
    fn test_ok_or_parse() {
        let missing: Option<u32> = None;
        let err = missing.ok_or_parse("no value").expect_err("should fail");
        assert_eq!(err.to_string(), "Parse error: no value");
    }
}
