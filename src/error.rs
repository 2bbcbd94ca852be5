use thiserror::Error;

use crate::validate::ValidationErrors;

#[derive(Error, Debug)]
pub enum EntigraphError {
    /// Caller supplied data that does not fit the declared model.
    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        errors: ValidationErrors,
    },
    /// Metadata or wiring defect, e.g. a referenced type that was never registered.
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, EntigraphError>;

impl EntigraphError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            errors: ValidationErrors::new(),
        }
    }
    pub fn invalid(errors: ValidationErrors) -> Self {
        Self::BadRequest {
            message: format!("{} validation error(s)", errors.len()),
            errors,
        }
    }
    /// The structured validation errors carried by a bad request, if any.
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::BadRequest { errors, .. } if !errors.is_empty() => Some(errors),
            _ => None,
        }
    }
}

// Helper conversions
impl From<rusqlite::Error> for EntigraphError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<config::ConfigError> for EntigraphError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl<T> From<std::sync::PoisonError<T>> for EntigraphError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
