use serde::{Deserialize, Serialize};

/// A problem found while loading recipe text, attributed to a source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ValidationError {
    pub line: usize,
    pub message: String,
}

impl ValidationError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Failure reported by an external collaborator (messaging, CRM, task store...).
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timed out after {0}s")]
    Timeout(u64),
    #[error("Rejected by collaborator: {0}")]
    Rejected(String),
    #[error("Collaborator not configured: {0}")]
    NotConfigured(String),
}

impl CollaboratorError {
    /// Rejections and missing configuration will not improve on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Network(_) | CollaboratorError::Timeout(_))
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CollaboratorError::Timeout(0)
        } else if let Some(status) = e.status() {
            if status.is_client_error() {
                CollaboratorError::Rejected(status.to_string())
            } else {
                CollaboratorError::Network(status.to_string())
            }
        } else {
            CollaboratorError::Network(e.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Rule set rejected with {} validation error(s)", .0.len())]
    Invalid(Vec<ValidationError>),
    #[error("Engine fault: {0}")]
    Fault(String),
}
