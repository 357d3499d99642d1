//! Structured error types.
//!
//! Errors must be classifiable, attributable, and actionable.
//! Every error answers: What failed? Why? What can be done next?

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Error category for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or constraint-violating request input.
    Validation,
    /// Referenced entity does not exist (or is not owned by the caller).
    NotFound,
    /// Missing or invalid credentials.
    Auth,
    /// Authenticated but not permitted (organization mismatch).
    Forbidden,
    /// File or CSV processing errors.
    Io,
    /// System-level errors (storage, serialization, rendering).
    System,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::NotFound => write!(f, "not_found"),
            Self::Auth => write!(f, "auth"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::Io => write!(f, "io"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Structured error with full context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvassError {
    /// Error category for classification.
    pub category: ErrorCategory,
    /// Unique error code within category.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Component and operation that originated the error.
    pub origin: String,
    /// Hint for recovery action.
    pub recovery_hint: Option<String>,
    /// Additional context key-value pairs (e.g. the offending field).
    pub context: HashMap<String, String>,
}

impl CanvassError {
    /// Creates a new error with the given parameters.
    #[must_use]
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            origin: origin.into(),
            recovery_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the recovery hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hint = Some(hint.into());
        self
    }

    /// Adds context to the error.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Creates a validation error scoped to a request field.
    #[must_use]
    pub fn validation(
        code: impl Into<String>,
        message: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCategory::Validation, code, message, origin)
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(
        code: impl Into<String>,
        message: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCategory::NotFound, code, message, origin)
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn auth(
        code: impl Into<String>,
        message: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCategory::Auth, code, message, origin)
    }

    /// Creates an authorization error.
    #[must_use]
    pub fn forbidden(
        code: impl Into<String>,
        message: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCategory::Forbidden, code, message, origin)
    }

    /// Creates a file/CSV processing error.
    #[must_use]
    pub fn io(
        code: impl Into<String>,
        message: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCategory::Io, code, message, origin)
    }

    /// Creates a system error.
    #[must_use]
    pub fn system(
        code: impl Into<String>,
        message: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCategory::System, code, message, origin)
    }

    /// HTTP status code for the API boundary.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self.category {
            ErrorCategory::Validation => 400,
            ErrorCategory::Auth => 401,
            ErrorCategory::Forbidden => 403,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Io | ErrorCategory::System => 500,
        }
    }
}

impl std::fmt::Display for CanvassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.category, self.code, self.message)
    }
}

impl std::error::Error for CanvassError {}

/// Result type using `CanvassError`.
pub type Result<T> = std::result::Result<T, CanvassError>;

/// Exit codes for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    NotFound = 2,
    PermissionDenied = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CanvassError::system("store_write_failed", "Failed to write state", "storage");
        assert!(err.to_string().contains("system"));
        assert!(err.to_string().contains("store_write_failed"));
    }

    #[test]
    fn error_with_context() {
        let err = CanvassError::validation(
            "invalid_column",
            "Invalid column selected: status",
            "analytics:plot",
        )
        .with_context("column", "status")
        .with_hint("Upload the CSV again to see its columns");

        assert_eq!(err.context.get("column"), Some(&"status".to_string()));
        assert!(err.recovery_hint.is_some());
    }

    #[test]
    fn error_http_status_mapping() {
        assert_eq!(CanvassError::validation("c", "m", "o").http_status(), 400);
        assert_eq!(CanvassError::auth("c", "m", "o").http_status(), 401);
        assert_eq!(CanvassError::forbidden("c", "m", "o").http_status(), 403);
        assert_eq!(CanvassError::not_found("c", "m", "o").http_status(), 404);
        assert_eq!(CanvassError::io("c", "m", "o").http_status(), 500);
    }

    #[test]
    fn error_serialization() {
        let err = CanvassError::not_found("survey_not_found", "Survey not found", "registry")
            .with_context("survey_id", "42");

        let json = serde_json::to_string(&err).expect("serialize");
        let restored: CanvassError = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(restored.category, ErrorCategory::NotFound);
        assert_eq!(restored.code, "survey_not_found");
    }
}
