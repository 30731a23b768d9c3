//! Service-level error taxonomy
//!
//! Every failure that can cross a component boundary is expressed as a
//! [`ServiceError`]. Layer-specific errors (ledger, worker transport, planner,
//! configuration) convert into it with `?`, and the HTTP surface maps each
//! variant onto a status code.

use crate::config::ConfigError;
use crate::ledger::LedgerError;
use crate::planner::PlannerError;
use crate::worker::WorkerError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use warp::http::StatusCode;

/// Maximum length of fault text persisted into the ledger
const MAX_FAULT_MESSAGE_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Main error type for webhook ingestion and orchestration
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Webhook configuration not found: {webhook_id}")]
    ConfigNotFound { webhook_id: String },

    #[error("Duplicate delivery suppressed for webhook: {webhook_id}")]
    DuplicateDelivery { webhook_id: String },

    #[error("Webhook configuration already exists: {webhook_id}")]
    AlreadyExists { webhook_id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Planner failure: {0}")]
    PlannerFailure(#[from] PlannerError),

    #[error("Worker transport failure: {0}")]
    WorkerTransport(#[from] WorkerError),

    #[error("Unrecognized worker result shape: {message}")]
    AggregationAmbiguity { message: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ServiceError {
    /// Create config-not-found error
    pub fn config_not_found<S: Into<String>>(webhook_id: S) -> Self {
        Self::ConfigNotFound {
            webhook_id: webhook_id.into(),
        }
    }

    /// Create duplicate delivery error
    pub fn duplicate_delivery<S: Into<String>>(webhook_id: S) -> Self {
        Self::DuplicateDelivery {
            webhook_id: webhook_id.into(),
        }
    }

    /// Create already-exists error
    pub fn already_exists<S: Into<String>>(webhook_id: S) -> Self {
        Self::AlreadyExists {
            webhook_id: webhook_id.into(),
        }
    }

    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code surfaced to API callers
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ConfigNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::DuplicateDelivery { .. } | ServiceError::AlreadyExists { .. } => {
                StatusCode::CONFLICT
            }
            ServiceError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Ledger(LedgerError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::PlannerFailure(_) | ServiceError::WorkerTransport(_) => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::AggregationAmbiguity { .. }
            | ServiceError::Ledger(_)
            | ServiceError::Persistence { .. }
            | ServiceError::Config(_)
            | ServiceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to persist or return to callers
    pub fn public_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

/// Redact secrets and sensitive paths, and cap the length of fault text
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_FAULT_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_FAULT_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            ServiceError::config_not_found("meeting").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::duplicate_delivery("meeting").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::already_exists("meeting").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::invalid_input("id is required").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::persistence("disk full").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unknown_invocation_maps_to_not_found() {
        let error = ServiceError::from(LedgerError::NotFound("meeting-1".to_string()));
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_constructor_display() {
        let error = ServiceError::config_not_found("meeting");
        assert!(matches!(error, ServiceError::ConfigNotFound { .. }));
        assert_eq!(
            error.to_string(),
            "Webhook configuration not found: meeting"
        );

        let error = ServiceError::internal_error("unexpected state");
        assert_eq!(error.to_string(), "Internal error: unexpected state");
    }

    #[test]
    fn test_error_message_sanitization() {
        let error =
            ServiceError::internal_error("Planner rejected call: password=secret123 token=abc456");
        let message = error.public_message();

        assert!(!message.contains("secret123"));
        assert!(!message.contains("abc456"));
        assert!(message.contains("password=***"));
        assert!(message.contains("token=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));

        assert!(sanitized.len() <= MAX_FAULT_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let sanitized = sanitize_error_message(&"é".repeat(400));
        assert!(sanitized.len() <= MAX_FAULT_MESSAGE_LEN);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_file_path_redaction() {
        let sanitized = sanitize_error_message("Failed to read /home/user/.ssh/id_rsa");

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("/home/user/.ssh/id_rsa"));
    }

    #[test]
    fn test_sanitize_exactly_limit() {
        let message = "x".repeat(MAX_FAULT_MESSAGE_LEN);
        let sanitized = sanitize_error_message(&message);
        assert_eq!(sanitized.len(), MAX_FAULT_MESSAGE_LEN);
        assert!(!sanitized.contains("truncated"));
    }

    #[test]
    fn test_sanitize_empty_message() {
        assert_eq!(sanitize_error_message(""), "");
    }
}
