//! Rejections raised by post types before anything reaches the store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("post rejected: {field} {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
}

impl DomainError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}
