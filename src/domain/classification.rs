//! Structured error classification for outbound calls (§7, §9 REDESIGN FLAGS).
//!
//! The External Agent Client never returns a raw error string to be
//! pattern-matched later by the Outbox Processor. Instead every outbound
//! call returns a `ClassifiedOutcome`, tagged with a stable `ErrorCode` at
//! the source. The processor's retry/terminal decision becomes a pure
//! function over this classified outcome.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::errors::DomainError;

/// Stable error codes used on `orchestration.error_code` and in events (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    AuthFailed,
    RateLimit,
    CursorApiError,
    NetworkError,
    RepoCloneFailed,
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::AuthFailed => "AUTH_FAILED",
            Self::RateLimit => "RATE_LIMIT",
            Self::CursorApiError => "CURSOR_API_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::RepoCloneFailed => "REPO_CLONE_FAILED",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Whether the outbox processor should retry a job that failed with
    /// this code (subject to `attempts < max_attempts`). `ValidationError`
    /// and `RepoCloneFailed` are terminal per §7; everything else, including
    /// the `UnknownError` fallback, gets the standard retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AuthFailed | Self::RateLimit | Self::CursorApiError | Self::NetworkError | Self::UnknownError
        )
    }
}

#[derive(Debug, Clone, Error)]
#[error("{code:?}: {message}")]
pub struct ClassifiedError {
    pub code: ErrorCode,
    pub message: String,
    /// Truncated to 200 chars per §4.5 failure classification.
    pub response_body: Option<String>,
}

impl ClassifiedError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            response_body: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        let truncated: String = body.chars().take(200).collect();
        self.response_body = Some(truncated);
        self
    }

    pub fn from_http_status(status: u16, body: String) -> Self {
        let code = match status {
            401 | 403 => ErrorCode::AuthFailed,
            429 => ErrorCode::RateLimit,
            _ => ErrorCode::CursorApiError,
        };
        Self::new(code, format!("HTTP {status}")).with_body(body)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }
}

/// Lets persistence-layer failures (`StateStore`/repository errors) flow
/// through the same classified-outcome return types the Outbox Processor
/// consumes, instead of being stringified before they get there.
impl From<DomainError> for ClassifiedError {
    fn from(err: DomainError) -> Self {
        Self::new(ErrorCode::UnknownError, err.to_string())
    }
}

pub type ClassifiedOutcome<T> = Result<T, ClassifiedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_401_classifies_as_auth_failed() {
        let err = ClassifiedError::from_http_status(401, "unauthorized".into());
        assert_eq!(err.code, ErrorCode::AuthFailed);
        assert!(err.code.is_retryable());
    }

    #[test]
    fn status_429_classifies_as_rate_limit() {
        let err = ClassifiedError::from_http_status(429, String::new());
        assert_eq!(err.code, ErrorCode::RateLimit);
    }

    #[test]
    fn status_500_classifies_as_cursor_api_error() {
        let err = ClassifiedError::from_http_status(500, "boom".into());
        assert_eq!(err.code, ErrorCode::CursorApiError);
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = ClassifiedError::validation("prompt too long");
        assert!(!err.code.is_retryable());
    }

    #[test]
    fn body_is_truncated_to_200_chars() {
        let long_body = "x".repeat(500);
        let err = ClassifiedError::from_http_status(500, long_body);
        assert_eq!(err.response_body.unwrap().len(), 200);
    }

    #[test]
    fn domain_errors_classify_as_unknown_and_retryable() {
        let err: ClassifiedError = DomainError::DatabaseError("locked".into()).into();
        assert_eq!(err.code, ErrorCode::UnknownError);
        assert!(err.code.is_retryable());
    }

    #[test]
    fn repo_clone_failed_is_not_retryable() {
        assert!(!ErrorCode::RepoCloneFailed.is_retryable());
    }
}
