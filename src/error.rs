//! Unified error model for the data-access layer.
//! Every public operation returns `AppResult<T>`; callers distinguish validation,
//! authorization, not-found and infrastructure failures by variant rather than by message.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Malformed filter, unknown relation, missing required property, bad policy line.
    #[error("{code}: {message}")]
    UserInput { code: String, message: String },
    #[error("{code}: {message}")]
    NotFound { code: String, message: String },
    #[error("{code}: {message}")]
    Conflict { code: String, message: String },
    /// Authorization denied. Never an infrastructure failure.
    #[error("{code}: {message}")]
    Auth { code: String, message: String },
    /// Raised by lifecycle hook handlers.
    #[error("{code}: {message}")]
    Exec { code: String, message: String },
    /// Store, cache or datasource unavailable.
    #[error("{code}: {message}")]
    Io { code: String, message: String },
    #[error("{code}: {message}")]
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Exec { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Exec { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<S: Into<String>>(code: S, msg: S) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn exec<S: Into<String>>(code: S, msg: S) -> Self { AppError::Exec { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    pub fn is_auth_denied(&self) -> bool { matches!(self, AppError::Auth { .. }) }
    pub fn is_not_found(&self) -> bool { matches!(self, AppError::NotFound { .. }) }
    pub fn is_user_input(&self) -> bool { matches!(self, AppError::UserInput { .. }) }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Auth { .. } => 401,
            AppError::Exec { .. } => 422,
            AppError::Io { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::UserInput { code: "invalid_json".into(), message: err.to_string() }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as Exec unless downcasted elsewhere
        if let Some(app) = err.downcast_ref::<AppError>() { return app.clone(); }
        AppError::Exec { code: "exec_error".into(), message: err.to_string() }
    }
}
