use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use super::{AdaptorKind, JsonAdaptor, PayloadAdaptor, ProtoAdaptor, RpcRequest};
use crate::error::AdaptorError;
use crate::session::StreamSessionConfig;

/// Protobuf adaptor that accepts legacy JSON uploads.
///
/// Each payload is decoded as protobuf first. When that fails because the
/// payload does not fit the schema, it is parsed as JSON instead; if JSON
/// fails too the protobuf error is reported. Requests to the device are
/// always protobuf.
#[derive(Debug, Clone)]
pub struct BackwardCompatibilityAdaptor {
    proto: Arc<ProtoAdaptor>,
    json: Arc<JsonAdaptor>,
}

impl BackwardCompatibilityAdaptor {
    /// Combine the shared protobuf and JSON adaptors
    #[must_use]
    pub const fn new(proto: Arc<ProtoAdaptor>, json: Arc<JsonAdaptor>) -> Self {
        Self { proto, json }
    }

    fn with_fallback<P, J>(&self, kind: &str, proto: P, json: J) -> Result<Value, AdaptorError>
    where
        P: FnOnce(&ProtoAdaptor) -> Result<Value, AdaptorError>,
        J: FnOnce(&JsonAdaptor) -> Result<Value, AdaptorError>,
    {
        match proto(&self.proto) {
            Err(err) if err.is_schema_mismatch() => match json(&self.json) {
                Ok(value) => {
                    debug!(kind, proto_error = %err, "payload accepted as JSON");
                    Ok(value)
                }
                Err(_) => Err(err),
            },
            other => other,
        }
    }
}

impl PayloadAdaptor for BackwardCompatibilityAdaptor {
    fn kind(&self) -> AdaptorKind {
        AdaptorKind::BackwardCompatibility
    }

    fn convert_telemetry(
        &self,
        config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError> {
        self.with_fallback(
            "telemetry",
            |proto| proto.convert_telemetry(config, payload),
            |json| json.convert_telemetry(config, payload),
        )
    }

    fn convert_attributes(
        &self,
        config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError> {
        self.with_fallback(
            "attributes",
            |proto| proto.convert_attributes(config, payload),
            |json| json.convert_attributes(config, payload),
        )
    }

    fn convert_rpc_response(
        &self,
        config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError> {
        self.with_fallback(
            "rpc_response",
            |proto| proto.convert_rpc_response(config, payload),
            |json| json.convert_rpc_response(config, payload),
        )
    }

    fn encode_rpc_request(
        &self,
        config: &StreamSessionConfig,
        request: &RpcRequest,
    ) -> Result<Bytes, AdaptorError> {
        self.proto.encode_rpc_request(config, request)
    }
}
