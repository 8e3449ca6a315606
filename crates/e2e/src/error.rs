//! Error types for the harness

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Playwright not found. Install with: npx playwright install firefox")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Test file error: {0}")]
    TestFile(String),

    #[error("Action {name} not found in {file}")]
    ActionNotFound { name: String, file: String },

    #[error("Integration {0} not found in the integration matrix")]
    UnknownIntegration(String),

    #[error("Invalid test selector {0:?}, expected <file>;<action>")]
    InvalidSelector(String),

    #[error("Invalid action data: {0}")]
    Validation(#[from] ValidationError),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("DER error: {0}")]
    Der(#[from] der::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// One offending field of an action record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every field that failed validation for one action record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Discriminator of the record, when it could be read
    pub action_type: Option<String>,
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    /// Whether `field` is among the offending fields
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.action_type.as_deref().unwrap_or("<unknown>");
        write!(f, "{} validation error(s) for {} action", self.errors.len(), kind)?;
        for error in &self.errors {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_field() {
        let err = ValidationError {
            action_type: Some("header".to_string()),
            errors: vec![
                FieldError::new("header_name", "must be a valid HTTP header"),
                FieldError::new("header_rx", "invalid regex"),
            ],
        };

        let rendered = err.to_string();
        assert!(rendered.starts_with("2 validation error(s) for header action"));
        assert!(rendered.contains("header_name: must be a valid HTTP header"));
        assert!(rendered.contains("header_rx: invalid regex"));
        assert!(err.has_field("header_rx"));
        assert!(!err.has_field("url"));
    }
}
