use serde::Serialize;
use thiserror::Error;

/// Wire-level error codes. Retryability is part of the contract: clients
/// re-send `LOCK_TIMEOUT` and `REQUEST_IN_PROGRESS` with the same request
/// id, everything else needs operator or user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "INSUFFICIENT_BALANCE")]
    InsufficientBalance,
    #[serde(rename = "LOCK_TIMEOUT")]
    LockTimeout,
    #[serde(rename = "REQUEST_IN_PROGRESS")]
    RequestInProgress,
    #[serde(rename = "DUPLICATE_REQUEST")]
    DuplicateRequest,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ErrorCode::LockTimeout => "LOCK_TIMEOUT",
            ErrorCode::RequestInProgress => "REQUEST_IN_PROGRESS",
            ErrorCode::DuplicateRequest => "DUPLICATE_REQUEST",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Domain error carried from handlers to the router, which renders it into
/// the response envelope without further inspection.
#[derive(Error, Debug, Clone)]
#[error("{}: {message}", code.as_str())]
pub struct DomainError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    pub details: Option<serde_json::Value>,
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    fn new(code: ErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message, false)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message, false)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message, false)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message, false)
    }

    pub fn insufficient_balance() -> Self {
        Self::new(
            ErrorCode::InsufficientBalance,
            "insufficient balance",
            false,
        )
    }

    pub fn lock_timeout(key: &str) -> Self {
        Self::new(
            ErrorCode::LockTimeout,
            format!("could not acquire lock {key}"),
            true,
        )
    }

    pub fn request_in_progress() -> Self {
        Self::new(
            ErrorCode::RequestInProgress,
            "request is already being processed",
            true,
        )
    }

    pub fn duplicate_request() -> Self {
        Self::new(
            ErrorCode::DuplicateRequest,
            "request id was already used by a failed request",
            false,
        )
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message, false)
    }

    /// `CONFLICT` wrapping a transient condition (lock timeout below a
    /// collaborator, provider hiccup) keeps its retryable flag.
    pub fn conflict_retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message, true)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message, false)
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        log::error!("database error: {err}");
        DomainError::internal("database error")
    }
}

impl From<money::MoneyError> for DomainError {
    fn from(err: money::MoneyError) -> Self {
        DomainError::validation(err.to_string())
    }
}

/// True when a sqlx error is a unique-index violation, the signal the
/// idempotency layers key on.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability_table() {
        assert!(!DomainError::validation("x").retryable);
        assert!(!DomainError::insufficient_balance().retryable);
        assert!(DomainError::lock_timeout("k").retryable);
        assert!(DomainError::request_in_progress().retryable);
        assert!(!DomainError::duplicate_request().retryable);
        assert!(!DomainError::conflict("x").retryable);
        assert!(DomainError::conflict_retryable("x").retryable);
        assert!(!DomainError::internal("x").retryable);
    }

    #[test]
    fn test_code_strings() {
        assert_eq!(ErrorCode::InsufficientBalance.as_str(), "INSUFFICIENT_BALANCE");
        assert_eq!(ErrorCode::LockTimeout.as_str(), "LOCK_TIMEOUT");
    }
}
