//! Payload adaptors and per-session selection.
//!
//! An adaptor turns device payloads into JSON values for the rule pipeline
//! and encodes server-to-device RPC requests. Which adaptor a session uses
//! follows from its [`StreamSessionConfig`]:
//!
//! | payload type | compatibility | adaptor |
//! |---|---|---|
//! | JSON | - | [`JsonAdaptor`] |
//! | protobuf | off | [`ProtoAdaptor`] |
//! | protobuf | on | [`BackwardCompatibilityAdaptor`] |

mod compat;
mod json;
mod proto;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AdaptorError;
use crate::session::StreamSessionConfig;

pub use compat::BackwardCompatibilityAdaptor;
pub use json::JsonAdaptor;
pub use proto::ProtoAdaptor;

/// Which adaptor implementation is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdaptorKind {
    /// Plain JSON
    Json,
    /// Schema-based protobuf
    Proto,
    /// Protobuf first, JSON on schema mismatch
    BackwardCompatibility,
}

impl fmt::Display for AdaptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Proto => write!(f, "proto"),
            Self::BackwardCompatibility => write!(f, "backward-compatibility"),
        }
    }
}

/// Server-to-device RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    /// Request id, also carried in the topic
    pub request_id: i32,
    /// Method to invoke
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Build a request
    pub fn new(request_id: i32, method: impl Into<String>, params: Value) -> Self {
        Self {
            request_id,
            method: method.into(),
            params,
        }
    }

    /// Parameters as text: strings verbatim, anything else serialized
    #[must_use]
    pub fn params_text(&self) -> String {
        match &self.params {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// Converts payloads of one session between wire and JSON form
pub trait PayloadAdaptor: Send + Sync + fmt::Debug {
    /// Implementation in use
    fn kind(&self) -> AdaptorKind;

    /// Decode a telemetry upload
    fn convert_telemetry(
        &self,
        config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError>;

    /// Decode an attribute update
    fn convert_attributes(
        &self,
        config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError>;

    /// Decode the device's answer to an RPC request
    fn convert_rpc_response(
        &self,
        config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError>;

    /// Encode an RPC request for the device
    fn encode_rpc_request(
        &self,
        config: &StreamSessionConfig,
        request: &RpcRequest,
    ) -> Result<Bytes, AdaptorError>;
}

/// Shared adaptor instances, one per kind
#[derive(Debug, Clone)]
pub struct AdaptorSet {
    json: Arc<JsonAdaptor>,
    proto: Arc<ProtoAdaptor>,
    compat: Arc<BackwardCompatibilityAdaptor>,
}

impl AdaptorSet {
    /// Build the shared adaptors
    #[must_use]
    pub fn new() -> Self {
        let json = Arc::new(JsonAdaptor::new());
        let proto = Arc::new(ProtoAdaptor::new());
        let compat = Arc::new(BackwardCompatibilityAdaptor::new(
            Arc::clone(&proto),
            Arc::clone(&json),
        ));
        Self {
            json,
            proto,
            compat,
        }
    }

    /// Adaptor for a session with configuration `config`
    #[must_use]
    pub fn select(&self, config: &StreamSessionConfig) -> Arc<dyn PayloadAdaptor> {
        if config.is_json() {
            return self.json.clone();
        }
        if config.json_compatibility {
            return self.compat.clone();
        }
        self.proto.clone()
    }

    /// The plain JSON adaptor
    #[must_use]
    pub fn json(&self) -> Arc<JsonAdaptor> {
        Arc::clone(&self.json)
    }

    /// The protobuf adaptor
    #[must_use]
    pub fn proto(&self) -> Arc<ProtoAdaptor> {
        Arc::clone(&self.proto)
    }
}

impl Default for AdaptorSet {
    fn default() -> Self {
        Self::new()
    }
}
