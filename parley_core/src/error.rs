use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failure as reported by the transport, before classification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RawError {
    #[error("connection unavailable: {0}")]
    Connectivity(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response shape: {0}")]
    Parse(String),

    #[error("{0}")]
    Other(String),
}

/// The closed failure taxonomy shared by every model-backed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Offline,
    AuthConfig,
    RateLimited,
    ServerError,
    SafetyBlocked,
    MalformedResponse,
    Unknown,
    ContractViolation,
}

impl ErrorKind {
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(
            self,
            Self::AuthConfig | Self::SafetyBlocked | Self::ContractViolation
        )
    }

    /// User-facing sentence for this kind. `Unknown` has no fixed wording,
    /// callers supply an operation-specific one.
    #[must_use]
    pub const fn user_message(self) -> Option<&'static str> {
        match self {
            Self::Offline => {
                Some("You appear to be offline. Please check your internet connection.")
            }
            Self::AuthConfig => {
                Some("There's a configuration issue with the AI service. Unable to proceed.")
            }
            Self::RateLimited => {
                Some("The service is currently busy. Please wait a moment and try again.")
            }
            Self::ServerError => Some(
                "The AI service is experiencing technical difficulties. Please try again later.",
            ),
            Self::SafetyBlocked => Some(
                "The request was blocked for safety reasons. Please adjust your prompt and try again.",
            ),
            Self::MalformedResponse => {
                Some("The AI returned a response in an unexpected format. Please try again.")
            }
            Self::Unknown | Self::ContractViolation => None,
        }
    }
}

/// A normalized failure carrying its retry decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    /// Raw failure text, for logs only.
    pub detail: String,
}

impl ClassifiedError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn contract_violation(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorKind::ContractViolation, message.clone(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_decision_per_kind() {
        let retryable = [
            ErrorKind::Offline,
            ErrorKind::RateLimited,
            ErrorKind::ServerError,
            ErrorKind::MalformedResponse,
            ErrorKind::Unknown,
        ];
        let terminal = [
            ErrorKind::AuthConfig,
            ErrorKind::SafetyBlocked,
            ErrorKind::ContractViolation,
        ];

        assert!(retryable.iter().all(|k| k.is_retryable()));
        assert!(terminal.iter().all(|k| !k.is_retryable()));
    }

    #[test]
    fn contract_violation_is_terminal() {
        let err = ClassifiedError::contract_violation("Cannot send an empty message.");
        assert_eq!(err.kind, ErrorKind::ContractViolation);
        assert!(!err.retryable);
        assert_eq!(err.to_string(), "Cannot send an empty message.");
    }

    #[test]
    fn status_display_carries_code() {
        let raw = RawError::Status {
            status: 429,
            message: "slow down".to_string(),
        };
        assert_eq!(raw.to_string(), "HTTP 429: slow down");
    }
}
