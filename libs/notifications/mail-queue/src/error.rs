//! Error types for the mail queue and its mailers.
//!
//! Mailer errors are categorized so the worker can log what kind of drop
//! happened:
//! - **Transient**: throttling, temporary network failure
//! - **Permanent**: invalid address, unverified identity, bad template data
//! - **LocalIo**: the attachment could not be read, no provider call was made

use std::path::PathBuf;
use thiserror::Error;

/// Result type for mailer operations.
pub type MailerResult<T> = Result<T, MailerError>;

/// Category of a mailer failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    Permanent,
    LocalIo,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
            ErrorCategory::LocalIo => write!(f, "local_io"),
        }
    }
}

/// Errors returned by a [`Mailer`](crate::mailer::Mailer).
#[derive(Error, Debug)]
pub enum MailerError {
    /// Provider failure that may succeed later (throttling, timeouts).
    #[error("Transient provider error: {message}")]
    Transient {
        message: String,
        code: Option<String>,
    },

    /// Provider rejected the request (bad address, unverified sender, ...).
    #[error("Permanent provider error: {message}")]
    Permanent {
        message: String,
        code: Option<String>,
    },

    /// Attachment file missing or unreadable.
    #[error("Failed to read attachment {}: {source}", path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template missing, unparsable, or data incomplete.
    #[error("Template error: {0}")]
    Template(String),

    /// Message could not be composed (malformed address, MIME build failure).
    #[error("Compose error: {0}")]
    Compose(String),

    /// Mailer misconfigured.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MailerError {
    /// Create a transient error without a provider code
    pub fn transient(message: impl Into<String>) -> Self {
        MailerError::Transient {
            message: message.into(),
            code: None,
        }
    }

    /// Create a permanent error without a provider code
    pub fn permanent(message: impl Into<String>) -> Self {
        MailerError::Permanent {
            message: message.into(),
            code: None,
        }
    }

    /// Error category for logging.
    pub fn category(&self) -> ErrorCategory {
        match self {
            MailerError::Transient { .. } => ErrorCategory::Transient,
            MailerError::Attachment { .. } => ErrorCategory::LocalIo,
            MailerError::Permanent { .. }
            | MailerError::Template(_)
            | MailerError::Compose(_)
            | MailerError::Config(_) => ErrorCategory::Permanent,
        }
    }

    /// Provider error code, when the provider returned one.
    pub fn code(&self) -> Option<&str> {
        match self {
            MailerError::Transient { code, .. } | MailerError::Permanent { code, .. } => {
                code.as_deref()
            }
            _ => None,
        }
    }
}

impl From<core_config::ConfigError> for MailerError {
    fn from(err: core_config::ConfigError) -> Self {
        MailerError::Config(err.to_string())
    }
}

impl From<lettre::address::AddressError> for MailerError {
    fn from(err: lettre::address::AddressError) -> Self {
        MailerError::Compose(format!("invalid address: {err}"))
    }
}

impl From<lettre::error::Error> for MailerError {
    fn from(err: lettre::error::Error) -> Self {
        MailerError::Compose(err.to_string())
    }
}

impl From<serde_json::Error> for MailerError {
    fn from(err: serde_json::Error) -> Self {
        MailerError::Compose(format!("JSON serialization error: {err}"))
    }
}

/// Errors returned by the queue controller.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Envelopes must name at least one recipient.
    #[error("Envelope has no recipients")]
    NoRecipients,

    /// `start()` needs a Tokio runtime to spawn the worker on.
    #[error("No Tokio runtime available to spawn the dispatch worker")]
    NoRuntime,

    /// `start()` was called while `stop()` is still joining the old worker.
    #[error("Dispatch worker is still stopping")]
    StopInProgress,

    /// The worker task panicked; surfaced by `stop()`.
    #[error("Dispatch worker panicked: {0}")]
    WorkerPanicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            MailerError::transient("throttled").category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            MailerError::Template("missing".into()).category(),
            ErrorCategory::Permanent
        );

        let io = MailerError::Attachment {
            path: PathBuf::from("/nope.png"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(io.category(), ErrorCategory::LocalIo);
        assert!(io.to_string().contains("/nope.png"));
    }

    #[test]
    fn test_code() {
        let err = MailerError::Permanent {
            message: "Email address is not verified".into(),
            code: Some("MessageRejected".into()),
        };
        assert_eq!(err.code(), Some("MessageRejected"));
        assert_eq!(MailerError::transient("x").code(), None);
    }
}
