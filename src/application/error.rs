use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{feed::FeedError, maintenance::MaintenanceError, repos::RepoError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Full error chain attached to a failed response for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Error returned by HTTP handlers: a fixed public message plus a private
/// report.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

const FEED_SOURCE: &str = "infra::http::feed_error_to_http_error";
const MAINTENANCE_SOURCE: &str = "infra::http::maintenance_error_to_http_error";

impl From<FeedError> for HttpError {
    fn from(error: FeedError) -> Self {
        match error {
            FeedError::InvalidCursor(cursor) => HttpError::new(
                FEED_SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid cursor",
                format!("Cursor could not be decoded: {cursor}"),
            ),
            FeedError::InvalidPage(page) => HttpError::new(
                FEED_SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid page",
                format!("Page {page} is out of range"),
            ),
            FeedError::InvalidActor(actor) => HttpError::new(
                FEED_SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid actor",
                format!("Actor {actor} is not a valid user id"),
            ),
            FeedError::Unavailable(err) => HttpError::from_error(
                FEED_SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Feed temporarily unavailable",
                &err,
            ),
        }
    }
}

impl From<MaintenanceError> for HttpError {
    fn from(error: MaintenanceError) -> Self {
        match error {
            MaintenanceError::Domain(err @ DomainError::Validation { .. }) => {
                HttpError::from_error(
                    MAINTENANCE_SOURCE,
                    StatusCode::BAD_REQUEST,
                    "Post could not be created",
                    &err,
                )
            }
            MaintenanceError::Repo(err @ RepoError::InvalidInput { .. }) => HttpError::from_error(
                MAINTENANCE_SOURCE,
                StatusCode::BAD_REQUEST,
                "Post could not be created",
                &err,
            ),
            MaintenanceError::Repo(err) => HttpError::from_error(
                MAINTENANCE_SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
                &err,
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Maintenance(#[from] MaintenanceError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
