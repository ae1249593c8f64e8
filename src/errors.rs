use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Closed set of error kinds the core emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidName,
    InvalidInput,
    InvalidPath,
    PodNotFound,
    PodExists,
    StreamNotFound,
    RecordNotFound,
    NameExists,
    MissingName,
    Forbidden,
    Unauthorized,
    TokenExpired,
    InvalidToken,
    PodMismatch,
    ValidationError,
    SchemaError,
    Conflict,
    RateLimitExceeded,
    StorageError,
    DatabaseError,
    InternalError,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::InvalidName
            | ErrorKind::InvalidInput
            | ErrorKind::InvalidPath
            | ErrorKind::MissingName
            | ErrorKind::ValidationError
            | ErrorKind::SchemaError => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized | ErrorKind::TokenExpired | ErrorKind::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            ErrorKind::Forbidden | ErrorKind::PodMismatch => StatusCode::FORBIDDEN,
            ErrorKind::PodNotFound | ErrorKind::StreamNotFound | ErrorKind::RecordNotFound => {
                StatusCode::NOT_FOUND
            }
            ErrorKind::PodExists | ErrorKind::NameExists | ErrorKind::Conflict => {
                StatusCode::CONFLICT
            }
            ErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::StorageError | ErrorKind::DatabaseError | ErrorKind::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self).unwrap_or(Value::Null);
        write!(f, "{}", s.as_str().unwrap_or("INTERNAL_ERROR"))
    }
}

#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<Value>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        AppError { kind, message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: ErrorKind,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: &'a Option<Value>,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        if self.kind.status_code().is_server_error() {
            tracing::error!(kind = %self.kind, "{}", self.message);
        } else {
            tracing::debug!(kind = %self.kind, "{}", self.message);
        }
        HttpResponse::build(self.status_code()).json(ErrorEnvelope {
            error: ErrorBody { code: self.kind, message: &self.message, details: &self.details },
        })
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("database error: {}", e);
        AppError::new(ErrorKind::DatabaseError, "database error")
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        tracing::error!("storage error: {}", e);
        AppError::new(ErrorKind::StorageError, "storage error")
    }
}

pub type AppResult<T> = Result<T, AppError>;
