use bytes::Bytes;
use serde_json::{Value, json};

use super::{AdaptorKind, PayloadAdaptor, RpcRequest};
use crate::error::AdaptorError;
use crate::session::StreamSessionConfig;

/// Plain JSON payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAdaptor;

impl JsonAdaptor {
    /// New adaptor
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn parse(payload: &[u8]) -> Result<Value, AdaptorError> {
        if payload.is_empty() {
            return Err(AdaptorError::InvalidJson("payload is empty".into()));
        }
        Ok(serde_json::from_slice(payload)?)
    }
}

impl PayloadAdaptor for JsonAdaptor {
    fn kind(&self) -> AdaptorKind {
        AdaptorKind::Json
    }

    /// Telemetry is an object of readings or an array of timestamped objects
    fn convert_telemetry(
        &self,
        _config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError> {
        match Self::parse(payload)? {
            value @ (Value::Object(_) | Value::Array(_)) => Ok(value),
            other => Err(AdaptorError::UnexpectedShape(format!(
                "telemetry must be an object or array, got {other}"
            ))),
        }
    }

    fn convert_attributes(
        &self,
        _config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError> {
        match Self::parse(payload)? {
            value @ Value::Object(_) => Ok(value),
            other => Err(AdaptorError::UnexpectedShape(format!(
                "attributes must be an object, got {other}"
            ))),
        }
    }

    fn convert_rpc_response(
        &self,
        _config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError> {
        Self::parse(payload)
    }

    fn encode_rpc_request(
        &self,
        _config: &StreamSessionConfig,
        request: &RpcRequest,
    ) -> Result<Bytes, AdaptorError> {
        let body = json!({
            "method": request.method,
            "params": request.params,
        });
        Ok(Bytes::from(serde_json::to_vec(&body)?))
    }
}
