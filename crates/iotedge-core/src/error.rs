//! Error handling with rich context preservation.
//!
//! Every crate in the workspace converts its domain failures into the boxed
//! [`Error`] defined here so callers at the transport boundary get one
//! classification ([`ErrorKind`]) regardless of which component failed.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Result type alias for edge operations
pub type Result<T> = std::result::Result<T, Box<Error>>;

/// Error type with contextual information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    /// Unique identifier for this error instance
    pub id: Uuid,

    /// Error classification
    pub kind: ErrorKind,

    /// Human-readable error message
    pub message: String,

    /// Additional contextual information
    pub context: ErrorContext,
}

/// Error classification for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials were refused or could not be resolved
    CredentialRejected,

    /// No session matches the requested identifier
    SessionNotFound,

    /// A payload schema could not be parsed
    Schema,

    /// A payload could not be converted by an adaptor
    Payload,

    /// Configuration error
    Configuration,

    /// External collaborator (validator, security store) failed
    ExternalService,
}

/// Contextual information attached to an error
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Operation that was being performed
    pub operation: Option<String>,

    /// Component where error occurred
    pub component: Option<String>,

    /// Endpoint or registration id of the affected session
    pub session_key: Option<String>,

    /// Timestamp when error occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Error {
    /// Create a new error with the specified kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            context: ErrorContext {
                timestamp: chrono::Utc::now(),
                ..Default::default()
            },
        })
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::Schema, message)
    }

    /// Create a payload conversion error
    pub fn payload(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::Payload, message)
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create an external service error
    pub fn external_service(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::ExternalService, message)
    }

    /// Set the operation being performed
    #[must_use]
    pub fn with_operation(mut self: Box<Self>, operation: impl Into<String>) -> Box<Self> {
        self.context.operation = Some(operation.into());
        self
    }

    /// Set the component where error occurred
    #[must_use]
    pub fn with_component(mut self: Box<Self>, component: impl Into<String>) -> Box<Self> {
        self.context.component = Some(component.into());
        self
    }

    /// Set the endpoint or registration id of the affected session
    #[must_use]
    pub fn with_session_key(mut self: Box<Self>, key: impl Into<String>) -> Box<Self> {
        self.context.session_key = Some(key.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(operation) = &self.context.operation {
            write!(f, " (operation: {operation})")?;
        }

        if let Some(component) = &self.context.component {
            write!(f, " (component: {component})")?;
        }

        if let Some(key) = &self.context.session_key {
            write!(f, " (session: {key})")?;
        }

        Ok(())
    }
}

impl std::error::Error for Error {}

impl ErrorKind {
    /// Get a human-readable description of this error kind
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::CredentialRejected => "Credential rejected",
            Self::SessionNotFound => "Session not found",
            Self::Schema => "Schema error",
            Self::Payload => "Payload conversion error",
            Self::Configuration => "Configuration error",
            Self::ExternalService => "External service error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl From<config::ConfigError> for Box<Error> {
    fn from(err: config::ConfigError) -> Self {
        Error::configuration(format!("Configuration error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = Error::new(ErrorKind::CredentialRejected, "no profile");
        assert_eq!(error.kind, ErrorKind::CredentialRejected);
        assert_eq!(error.message, "no profile");
        assert_eq!(error.to_string(), "no profile");
    }

    #[test]
    fn test_error_context() {
        let error = Error::new(ErrorKind::SessionNotFound, "unknown session")
            .with_operation("lookup_by_session_uuid")
            .with_component("registry")
            .with_session_key("R100");

        assert_eq!(
            error.context.operation,
            Some("lookup_by_session_uuid".to_string())
        );
        assert_eq!(error.context.component, Some("registry".to_string()));
        assert_eq!(error.context.session_key, Some("R100".to_string()));
        assert_eq!(
            error.to_string(),
            "unknown session (operation: lookup_by_session_uuid) (component: registry) (session: R100)"
        );
    }

    #[test]
    fn test_config_error_conversion() {
        let err: Box<Error> = config::ConfigError::Message("bad key".into()).into();
        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.message.contains("bad key"));
        assert_eq!(ErrorKind::Configuration.to_string(), "Configuration error");
    }
}
