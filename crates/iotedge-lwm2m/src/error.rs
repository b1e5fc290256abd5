//! Registry error types

use iotedge_core::{Error, ErrorKind};

use crate::security::RejectReason;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Failures surfaced by the session registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No session matches the identifier
    #[error("Session not found: {session}")]
    SessionNotFound {
        /// Identifier that was looked up
        session: String,
    },

    /// The endpoint's credentials were refused during promotion
    #[error("Credentials rejected for endpoint {endpoint}: {reason}")]
    CredentialRejected {
        /// Endpoint being registered
        endpoint: String,
        /// Why validation failed
        reason: RejectReason,
    },
}

/// Failures reported by the external security store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityStoreError {
    /// The store could not be reached
    #[error("Security store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the operation
    #[error("Security store rejected {operation} for {endpoint}")]
    Rejected {
        /// Operation attempted
        operation: &'static str,
        /// Endpoint concerned
        endpoint: String,
    },
}

impl RegistryError {
    /// Create a session-not-found error
    pub fn session_not_found(session: impl Into<String>) -> Self {
        Self::SessionNotFound {
            session: session.into(),
        }
    }
}

impl From<RegistryError> for Box<Error> {
    fn from(err: RegistryError) -> Self {
        let (kind, key) = match &err {
            RegistryError::SessionNotFound { session } => (ErrorKind::SessionNotFound, session),
            RegistryError::CredentialRejected { endpoint, .. } => {
                (ErrorKind::CredentialRejected, endpoint)
            }
        };
        Error::new(kind, err.to_string())
            .with_session_key(key.clone())
            .with_component("lwm2m-registry")
    }
}

impl From<SecurityStoreError> for Box<Error> {
    fn from(err: SecurityStoreError) -> Self {
        Error::external_service(err.to_string()).with_component("security-store")
    }
}
