//! Stream-session error types

use iotedge_core::Error;

/// Failures compiling a proto3 payload schema
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Schema text is empty
    #[error("Schema is empty")]
    Empty,

    /// Schema declares no top-level message
    #[error("Schema declares no message")]
    NoMessage,

    /// Unexpected token
    #[error("Unexpected token '{found}' at line {line}, expected {expected}")]
    UnexpectedToken {
        /// Token that was found
        found: String,
        /// What the parser expected
        expected: &'static str,
        /// 1-based line number
        line: usize,
    },

    /// Input ended inside a declaration
    #[error("Unexpected end of schema, expected {expected}")]
    UnexpectedEof {
        /// What the parser expected
        expected: &'static str,
    },

    /// Field number outside the valid range
    #[error("Invalid field number {number} for field '{field}'")]
    InvalidFieldNumber {
        /// Field name
        field: String,
        /// Offending number
        number: i64,
    },

    /// Schema uses a construct this parser does not support
    #[error("Unsupported schema construct: {0}")]
    Unsupported(String),

    /// Invalid topic filter
    #[error("Invalid topic filter '{filter}': {reason}")]
    InvalidTopicFilter {
        /// Filter text
        filter: String,
        /// Why it was refused
        reason: String,
    },
}

/// Failures converting payloads between wire and JSON form
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdaptorError {
    /// Payload is not valid JSON
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(String),

    /// Payload is not valid for the session's protobuf schema
    #[error("Invalid protobuf payload: {0}")]
    InvalidProto(String),

    /// Session has no descriptor for this message kind
    #[error("No {0} schema configured for session")]
    MissingDescriptor(&'static str),

    /// Payload shape is valid but not what the message kind requires
    #[error("Unexpected payload shape: {0}")]
    UnexpectedShape(String),
}

impl AdaptorError {
    /// Whether a fallback to plain JSON parsing may succeed
    #[must_use]
    pub const fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::InvalidProto(_) | Self::MissingDescriptor(_))
    }
}

impl From<SchemaError> for Box<Error> {
    fn from(err: SchemaError) -> Self {
        Error::schema(err.to_string()).with_component("mqtt-schema")
    }
}

impl From<AdaptorError> for Box<Error> {
    fn from(err: AdaptorError) -> Self {
        Error::payload(err.to_string()).with_component("mqtt-adaptor")
    }
}

impl From<prost::DecodeError> for AdaptorError {
    fn from(err: prost::DecodeError) -> Self {
        Self::InvalidProto(err.to_string())
    }
}

impl From<serde_json::Error> for AdaptorError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidJson(err.to_string())
    }
}
