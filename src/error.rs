//! Typed errors, persistence code table and HTTP status mapping.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("invalid primary key: model {model} field {field}")]
    InvalidPrimaryKey { model: String, field: String },
    #[error("duplicate path segment: {0}")]
    DuplicatePathSegment(String),
    #[error("duplicate field: model {model} field {field}")]
    DuplicateField { model: String, field: String },
    #[error("schema load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Code raised by a model handle when the addressed row does not exist.
pub const NOT_FOUND_CODE: &str = "NOT_FOUND";
/// Code raised by a model handle for an operation it does not implement.
pub const UNSUPPORTED_CODE: &str = "UNSUPPORTED";

/// Persistence failure codes mapped to a status and a message safe to show clients.
/// Codes follow PostgreSQL SQLSTATE where one exists.
const PERSISTENCE_CODES: &[(&str, StatusCode, &str)] = &[
    ("23505", StatusCode::CONFLICT, "A record with this value already exists"),
    ("23503", StatusCode::BAD_REQUEST, "Referenced record does not exist"),
    ("23502", StatusCode::BAD_REQUEST, "A required field is missing"),
    ("22P02", StatusCode::BAD_REQUEST, "Invalid value format"),
    ("42703", StatusCode::BAD_REQUEST, "Unknown field"),
    (NOT_FOUND_CODE, StatusCode::NOT_FOUND, "Record not found"),
    (UNSUPPORTED_CODE, StatusCode::NOT_IMPLEMENTED, "Operation not supported by this model"),
];

const PERSISTENCE_FALLBACK: (StatusCode, &str) = (StatusCode::INTERNAL_SERVER_ERROR, "Database operation failed");

/// Looks up a persistence code; unmapped or absent codes get the generic fallback.
pub fn lookup_persistence_code(code: Option<&str>) -> (StatusCode, &'static str) {
    code.and_then(|c| {
        PERSISTENCE_CODES
            .iter()
            .find(|(known, _, _)| *known == c)
            .map(|(_, status, message)| (*status, *message))
    })
    .unwrap_or(PERSISTENCE_FALLBACK)
}

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct PersistenceError {
    pub code: Option<String>,
    pub message: String,
}

impl PersistenceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        PersistenceError {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        PersistenceError {
            code: None,
            message: message.into(),
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(NOT_FOUND_CODE, format!("record not found: {}", what))
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::new(UNSUPPORTED_CODE, format!("{} is not supported by this model", operation))
    }

    pub fn is_not_found(&self) -> bool {
        self.code.as_deref() == Some(NOT_FOUND_CODE)
    }
}

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => PersistenceError::not_found("row"),
            sqlx::Error::Database(db) => PersistenceError {
                code: db.code().map(|c| c.into_owned()),
                message: db.message().to_string(),
            },
            _ => PersistenceError::other(e.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("constraint violation: {}", .0.join("; "))]
    Constraint(Vec<String>),
    #[error("database: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Handler or hook misconfiguration.
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::Constraint(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Persistence(e) => lookup_persistence_code(e.code.as_deref()).0,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation_error",
            AppError::Constraint(_) => "constraint_violation",
            AppError::Persistence(e) if e.is_not_found() => "not_found",
            AppError::Persistence(_) => "database_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Message shown when verbose errors are off: never the underlying text.
    pub fn public_message(&self) -> &'static str {
        match self {
            AppError::Config(_) | AppError::Internal(_) => "Internal server error",
            AppError::NotFound(_) => "Resource not found",
            AppError::Validation(_) => "Validation failed",
            AppError::Constraint(_) => "Constraint violation",
            AppError::BadRequest(_) => "Invalid request",
            AppError::Persistence(e) => lookup_persistence_code(e.code.as_deref()).1,
        }
    }
}
