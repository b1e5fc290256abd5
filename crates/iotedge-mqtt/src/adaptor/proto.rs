//! Schema-driven protobuf decoding.
//!
//! Payloads are walked field by field against the session's compiled
//! [`MessageDescriptor`]s and rendered as JSON objects keyed by field name.
//! Only fields present on the wire appear in the output. Unknown field
//! numbers are skipped. Embedded messages may nest at most
//! [`RECURSION_LIMIT`] levels deep.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::encoding::{WireType, decode_key, decode_varint, encode_key, encode_varint};
use serde_json::{Map, Value};

use super::{AdaptorKind, PayloadAdaptor, RpcRequest};
use crate::error::AdaptorError;
use crate::schema::{
    Cardinality, FieldDescriptor, FieldType, MessageDescriptor, ScalarType, SessionSchemas,
};
use crate::session::StreamSessionConfig;

/// Deepest message nesting accepted while decoding, as in prost
const RECURSION_LIMIT: usize = 100;

/// Messages being decoded, outermost first
type Path<'a> = Vec<&'a MessageDescriptor>;

/// Protobuf payloads described by the session's proto3 schemas
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoAdaptor;

impl ProtoAdaptor {
    /// New adaptor
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn schemas<'a>(
        config: &'a StreamSessionConfig,
        kind: &'static str,
    ) -> Result<&'a SessionSchemas, AdaptorError> {
        config
            .schemas
            .as_deref()
            .ok_or(AdaptorError::MissingDescriptor(kind))
    }

    /// Decode `payload` as an instance of `descriptor`
    pub fn decode(
        &self,
        descriptor: &MessageDescriptor,
        payload: &[u8],
    ) -> Result<Value, AdaptorError> {
        decode_message(descriptor, payload, &mut Path::new()).map(Value::Object)
    }
}

impl PayloadAdaptor for ProtoAdaptor {
    fn kind(&self) -> AdaptorKind {
        AdaptorKind::Proto
    }

    fn convert_telemetry(
        &self,
        config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError> {
        let schemas = Self::schemas(config, "telemetry")?;
        self.decode(&schemas.telemetry, payload)
    }

    fn convert_attributes(
        &self,
        config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError> {
        let schemas = Self::schemas(config, "attributes")?;
        self.decode(&schemas.attributes, payload)
    }

    fn convert_rpc_response(
        &self,
        config: &StreamSessionConfig,
        payload: &[u8],
    ) -> Result<Value, AdaptorError> {
        let schemas = Self::schemas(config, "RPC response")?;
        self.decode(&schemas.rpc_response, payload)
    }

    fn encode_rpc_request(
        &self,
        config: &StreamSessionConfig,
        request: &RpcRequest,
    ) -> Result<Bytes, AdaptorError> {
        let schemas = Self::schemas(config, "RPC request")?;
        let mut buf = BytesMut::new();
        for field in &schemas.rpc_request.descriptor().fields {
            match field.name.as_str() {
                "method" => encode_string(field.number, &request.method, &mut buf),
                "requestId" => encode_request_id(field, request.request_id, &mut buf),
                "params" => encode_string(field.number, &request.params_text(), &mut buf),
                _ => {}
            }
        }
        Ok(buf.freeze())
    }
}

fn invalid(message: impl Into<String>) -> AdaptorError {
    AdaptorError::InvalidProto(message.into())
}

fn decode_message<'a>(
    descriptor: &'a MessageDescriptor,
    buf: &[u8],
    path: &mut Path<'a>,
) -> Result<Map<String, Value>, AdaptorError> {
    if path.len() >= RECURSION_LIMIT {
        return Err(invalid(format!(
            "message '{}' nested deeper than {RECURSION_LIMIT} levels",
            descriptor.full_name
        )));
    }
    path.push(descriptor);
    let decoded = decode_fields(descriptor, buf, path);
    path.pop();
    decoded
}

fn decode_fields<'a>(
    descriptor: &'a MessageDescriptor,
    mut buf: &[u8],
    path: &mut Path<'a>,
) -> Result<Map<String, Value>, AdaptorError> {
    let mut out = Map::new();
    while buf.has_remaining() {
        let (number, wire_type) = decode_key(&mut buf)?;
        let Some(field) = descriptor.field_by_number(number) else {
            skip_field(number, wire_type, &mut buf)?;
            continue;
        };
        decode_field(field, wire_type, &mut buf, &mut out, path)?;
    }
    Ok(out)
}

fn decode_field<'a>(
    field: &'a FieldDescriptor,
    wire_type: WireType,
    buf: &mut &[u8],
    out: &mut Map<String, Value>,
    path: &mut Path<'a>,
) -> Result<(), AdaptorError> {
    match field.cardinality {
        Cardinality::Map => {
            let FieldType::Message(entry) = &field.field_type else {
                return Err(invalid(format!("map field '{}' has no entry type", field.name)));
            };
            expect_wire_type(field, wire_type, WireType::LengthDelimited)?;
            let (key, value) = decode_map_entry(entry, take_length_delimited(buf)?, path)?;
            if let Value::Object(map) = out
                .entry(field.name.clone())
                .or_insert_with(|| Value::Object(Map::new()))
            {
                map.insert(key, value);
            }
        }
        Cardinality::Repeated => {
            let mut values = Vec::new();
            if wire_type == WireType::LengthDelimited && is_packable(&field.field_type) {
                let mut packed = take_length_delimited(buf)?;
                let element = scalar_wire_type(&field.field_type);
                while packed.has_remaining() {
                    values.push(decode_value(field, element, &mut packed, path)?);
                }
            } else {
                values.push(decode_value(field, wire_type, buf, path)?);
            }
            if let Value::Array(list) = out
                .entry(field.name.clone())
                .or_insert_with(|| Value::Array(Vec::new()))
            {
                list.extend(values);
            }
        }
        Cardinality::Singular | Cardinality::Optional => {
            let value = decode_value(field, wire_type, buf, path)?;
            out.insert(field.name.clone(), value);
        }
    }
    Ok(())
}

fn decode_map_entry<'a>(
    entry: &'a MessageDescriptor,
    payload: &[u8],
    path: &mut Path<'a>,
) -> Result<(String, Value), AdaptorError> {
    let mut decoded = decode_message(entry, payload, path)?;
    let key = match decoded.remove("key") {
        Some(Value::String(key)) => key,
        Some(other) => other.to_string(),
        None => entry
            .field_by_name("key")
            .map(|f| default_value(&f.field_type))
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .unwrap_or_default(),
    };
    let value = match decoded.remove("value") {
        Some(value) => value,
        None => entry
            .field_by_name("value")
            .map_or(Value::Null, |f| default_value(&f.field_type)),
    };
    Ok((key, value))
}

fn decode_value<'a>(
    field: &'a FieldDescriptor,
    wire_type: WireType,
    buf: &mut &[u8],
    path: &mut Path<'a>,
) -> Result<Value, AdaptorError> {
    match &field.field_type {
        FieldType::Scalar(scalar) => {
            expect_wire_type(field, wire_type, scalar_wire_type(&field.field_type))?;
            decode_scalar(*scalar, buf)
        }
        FieldType::Enum(descriptor) => {
            expect_wire_type(field, wire_type, WireType::Varint)?;
            let number = decode_varint(buf)? as i32;
            Ok(descriptor
                .value_name(number)
                .map_or_else(|| Value::from(number), Value::from))
        }
        FieldType::Message(descriptor) => {
            expect_wire_type(field, wire_type, WireType::LengthDelimited)?;
            decode_message(descriptor, take_length_delimited(buf)?, path).map(Value::Object)
        }
        FieldType::Recursive(full_name) => {
            expect_wire_type(field, wire_type, WireType::LengthDelimited)?;
            let descriptor = path
                .iter()
                .rev()
                .find(|enclosing| enclosing.full_name == *full_name)
                .copied()
                .ok_or_else(|| invalid(format!("no enclosing message '{full_name}'")))?;
            decode_message(descriptor, take_length_delimited(buf)?, path).map(Value::Object)
        }
    }
}

fn decode_scalar(scalar: ScalarType, buf: &mut &[u8]) -> Result<Value, AdaptorError> {
    Ok(match scalar {
        ScalarType::Int32 => Value::from(decode_varint(buf)? as i32),
        ScalarType::Int64 => Value::from(decode_varint(buf)? as i64),
        ScalarType::Uint32 => Value::from(decode_varint(buf)? as u32),
        ScalarType::Uint64 => Value::from(decode_varint(buf)?),
        ScalarType::Sint32 => {
            let raw = decode_varint(buf)? as u32;
            Value::from(((raw >> 1) as i32) ^ -((raw & 1) as i32))
        }
        ScalarType::Sint64 => {
            let raw = decode_varint(buf)?;
            Value::from(((raw >> 1) as i64) ^ -((raw & 1) as i64))
        }
        ScalarType::Bool => Value::from(decode_varint(buf)? != 0),
        ScalarType::Fixed32 => Value::from(take_fixed(buf, 4)?.get_u32_le()),
        ScalarType::Sfixed32 => Value::from(take_fixed(buf, 4)?.get_i32_le()),
        ScalarType::Float => Value::from(f64::from(take_fixed(buf, 4)?.get_f32_le())),
        ScalarType::Fixed64 => Value::from(take_fixed(buf, 8)?.get_u64_le()),
        ScalarType::Sfixed64 => Value::from(take_fixed(buf, 8)?.get_i64_le()),
        ScalarType::Double => Value::from(take_fixed(buf, 8)?.get_f64_le()),
        ScalarType::String => {
            let raw = take_length_delimited(buf)?;
            let text = std::str::from_utf8(raw)
                .map_err(|err| invalid(format!("string field is not UTF-8: {err}")))?;
            Value::from(text)
        }
        ScalarType::Bytes => Value::from(STANDARD.encode(take_length_delimited(buf)?)),
    })
}

fn default_value(field_type: &FieldType) -> Value {
    match field_type {
        FieldType::Scalar(ScalarType::Bool) => Value::Bool(false),
        FieldType::Scalar(ScalarType::String | ScalarType::Bytes) => Value::from(""),
        FieldType::Scalar(_) => Value::from(0),
        FieldType::Enum(descriptor) => descriptor
            .values
            .first()
            .map_or_else(|| Value::from(0), |(name, _)| Value::from(name.as_str())),
        FieldType::Message(_) | FieldType::Recursive(_) => Value::Object(Map::new()),
    }
}

fn is_packable(field_type: &FieldType) -> bool {
    match field_type {
        FieldType::Scalar(scalar) => scalar.is_packable(),
        FieldType::Enum(_) => true,
        FieldType::Message(_) | FieldType::Recursive(_) => false,
    }
}

const fn scalar_wire_type(field_type: &FieldType) -> WireType {
    match field_type {
        FieldType::Scalar(
            ScalarType::Double | ScalarType::Fixed64 | ScalarType::Sfixed64,
        ) => WireType::SixtyFourBit,
        FieldType::Scalar(ScalarType::Float | ScalarType::Fixed32 | ScalarType::Sfixed32) => {
            WireType::ThirtyTwoBit
        }
        FieldType::Scalar(ScalarType::String | ScalarType::Bytes)
        | FieldType::Message(_)
        | FieldType::Recursive(_) => WireType::LengthDelimited,
        FieldType::Scalar(_) | FieldType::Enum(_) => WireType::Varint,
    }
}

fn expect_wire_type(
    field: &FieldDescriptor,
    found: WireType,
    expected: WireType,
) -> Result<(), AdaptorError> {
    if found == expected {
        Ok(())
    } else {
        Err(invalid(format!(
            "field '{}' ({}) has wire type {found:?}, expected {expected:?}",
            field.name, field.number
        )))
    }
}

fn take_length_delimited<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], AdaptorError> {
    let len = usize::try_from(decode_varint(buf)?)
        .map_err(|_| invalid("length does not fit in memory"))?;
    take_fixed(buf, len)
}

fn take_fixed<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], AdaptorError> {
    if buf.len() < len {
        return Err(invalid(format!(
            "truncated payload: need {len} bytes, {} left",
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn skip_field(number: u32, wire_type: WireType, buf: &mut &[u8]) -> Result<(), AdaptorError> {
    match wire_type {
        WireType::Varint => {
            decode_varint(buf)?;
        }
        WireType::SixtyFourBit => {
            take_fixed(buf, 8)?;
        }
        WireType::ThirtyTwoBit => {
            take_fixed(buf, 4)?;
        }
        WireType::LengthDelimited => {
            take_length_delimited(buf)?;
        }
        WireType::StartGroup | WireType::EndGroup => {
            return Err(invalid(format!("field {number} uses unsupported group encoding")));
        }
    }
    Ok(())
}

fn encode_string(number: u32, value: &str, buf: &mut BytesMut) {
    encode_key(number, WireType::LengthDelimited, buf);
    encode_varint(value.len() as u64, buf);
    buf.put_slice(value.as_bytes());
}

fn encode_request_id(field: &FieldDescriptor, request_id: i32, buf: &mut BytesMut) {
    let wide = i64::from(request_id);
    let raw = match field.field_type {
        FieldType::Scalar(ScalarType::Sint32 | ScalarType::Sint64) => {
            ((wide << 1) ^ (wide >> 63)) as u64
        }
        _ => wide as u64,
    };
    encode_key(field.number, WireType::Varint, buf);
    encode_varint(raw, buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const READING: &str = r#"
        syntax = "proto3";
        package telemetry;

        message Reading {
          enum Level { LOW = 0; HIGH = 1; }
          string name = 1;
          sint32 delta = 2;
          double value = 3;
          repeated int32 samples = 4;
          Level level = 5;
          map<string, int64> counters = 6;
          bytes raw = 7;
        }
    "#;

    fn descriptor() -> MessageDescriptor {
        MessageDescriptor::parse(READING).unwrap()
    }

    fn put_len(number: u32, body: &[u8], buf: &mut BytesMut) {
        encode_key(number, WireType::LengthDelimited, buf);
        encode_varint(body.len() as u64, buf);
        buf.put_slice(body);
    }

    #[test]
    fn test_decode_every_field_kind() {
        let mut buf = BytesMut::new();
        encode_string(1, "boiler", &mut buf);
        encode_key(2, WireType::Varint, &mut buf);
        encode_varint(3, &mut buf); // zigzag(-2)
        encode_key(3, WireType::SixtyFourBit, &mut buf);
        buf.put_f64_le(21.5);
        let mut packed = BytesMut::new();
        for sample in [1_u64, 2, 300] {
            encode_varint(sample, &mut packed);
        }
        put_len(4, &packed, &mut buf);
        encode_key(5, WireType::Varint, &mut buf);
        encode_varint(1, &mut buf);
        let mut entry = BytesMut::new();
        encode_string(1, "restarts", &mut entry);
        encode_key(2, WireType::Varint, &mut entry);
        encode_varint(4, &mut entry);
        put_len(6, &entry, &mut buf);
        put_len(7, &[0xde, 0xad], &mut buf);

        let decoded = ProtoAdaptor::new().decode(&descriptor(), &buf).unwrap();

        pretty_assertions::assert_eq!(
            decoded,
            json!({
                "name": "boiler",
                "delta": -2,
                "value": 21.5,
                "samples": [1, 2, 300],
                "level": "HIGH",
                "counters": {"restarts": 4},
                "raw": "3q0=",
            })
        );
    }

    #[test]
    fn test_unknown_fields_skipped() {
        let mut buf = BytesMut::new();
        encode_key(42, WireType::Varint, &mut buf);
        encode_varint(7, &mut buf);
        encode_string(1, "x", &mut buf);

        let decoded = ProtoAdaptor::new().decode(&descriptor(), &buf).unwrap();
        assert_eq!(decoded, json!({"name": "x"}));
    }

    #[test]
    fn test_truncated_and_mismatched_payloads() {
        let adaptor = ProtoAdaptor::new();
        let mut truncated = BytesMut::new();
        encode_key(1, WireType::LengthDelimited, &mut truncated);
        encode_varint(10, &mut truncated);
        truncated.put_slice(b"abc");
        assert!(matches!(
            adaptor.decode(&descriptor(), &truncated),
            Err(AdaptorError::InvalidProto(_))
        ));

        let mut mismatched = BytesMut::new();
        encode_key(1, WireType::Varint, &mut mismatched);
        encode_varint(1, &mut mismatched);
        assert!(adaptor.decode(&descriptor(), &mismatched).is_err());

        // a JSON document starts with a group tag
        assert!(adaptor.decode(&descriptor(), br#"{"a":1}"#).is_err());
    }

    const TREE: &str = r#"
        message Node {
          string name = 1;
          repeated Node children = 2;
        }
    "#;

    fn nested(depth: usize) -> BytesMut {
        let mut node = BytesMut::new();
        encode_string(1, "leaf", &mut node);
        for _ in 0..depth {
            let mut parent = BytesMut::new();
            put_len(2, &node, &mut parent);
            node = parent;
        }
        node
    }

    #[test]
    fn test_recursive_message_decodes() {
        let tree = MessageDescriptor::parse(TREE).unwrap();

        let decoded = ProtoAdaptor::new().decode(&tree, &nested(2)).unwrap();

        assert_eq!(
            decoded,
            json!({"children": [{"children": [{"name": "leaf"}]}]})
        );
    }

    #[test]
    fn test_nesting_is_bounded() {
        let tree = MessageDescriptor::parse(TREE).unwrap();
        let adaptor = ProtoAdaptor::new();

        assert!(adaptor.decode(&tree, &nested(RECURSION_LIMIT - 1)).is_ok());
        assert!(matches!(
            adaptor.decode(&tree, &nested(RECURSION_LIMIT)),
            Err(AdaptorError::InvalidProto(_))
        ));
    }

    #[test]
    fn test_missing_schemas() {
        let config = StreamSessionConfig::defaults(&crate::topic::TopicFilterResolver::default());
        let err = ProtoAdaptor::new()
            .convert_telemetry(&config, &[])
            .unwrap_err();
        assert_eq!(err, AdaptorError::MissingDescriptor("telemetry"));
        assert!(err.is_schema_mismatch());
    }

    #[test]
    fn test_rpc_request_encoding() {
        let schemas = SessionSchemas::compile(&iotedge_core::ProtoPayloadConfiguration {
            device_telemetry_proto_schema: READING.to_string(),
            device_attributes_proto_schema: READING.to_string(),
            device_rpc_response_proto_schema: READING.to_string(),
            device_rpc_request_proto_schema: String::new(),
            enable_compatibility_with_json_payload_format: false,
        })
        .unwrap();
        let mut config =
            StreamSessionConfig::defaults(&crate::topic::TopicFilterResolver::default());
        config.schemas = Some(std::sync::Arc::new(schemas.clone()));

        let adaptor = ProtoAdaptor::new();
        let request = RpcRequest::new(-3, "reboot", json!({"delay": 5}));
        let bytes = adaptor.encode_rpc_request(&config, &request).unwrap();

        let decoded = adaptor
            .decode(schemas.rpc_request.descriptor(), &bytes)
            .unwrap();
        assert_eq!(
            decoded,
            json!({"method": "reboot", "requestId": -3, "params": "{\"delay\":5}"})
        );
    }
}
