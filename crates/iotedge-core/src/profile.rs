//! Raw device-profile model as delivered by the profile change feed.
//!
//! These types mirror the upstream JSON document. They are *not* what the
//! transports consume at message time; each transport compiles them into its
//! own immutable view (the LwM2M client profile, the MQTT session config).

use serde::{Deserialize, Serialize};

use crate::types::ProfileId;

/// Device profile as stored upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    /// Profile identifier
    pub id: ProfileId,
    /// Display name
    pub name: String,
    /// Profile payload
    #[serde(default)]
    pub profile_data: DeviceProfileData,
}

/// Profile payload holding the per-transport configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfileData {
    /// Transport configuration, absent for profiles not yet configured
    #[serde(default)]
    pub transport_configuration: Option<TransportConfiguration>,
}

/// Transport-specific configuration of a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum TransportConfiguration {
    /// Default transport settings, no protocol specifics
    Default,
    /// MQTT topic and payload settings
    Mqtt(MqttTransportConfiguration),
    /// LwM2M object/observation settings
    Lwm2m(Lwm2mTransportConfiguration),
    /// CoAP settings (not consumed by this edge)
    Coap,
}

/// Payload encoding negotiated for a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportPayloadType {
    /// Plain JSON payloads
    #[default]
    Json,
    /// Schema-described protobuf payloads
    Protobuf,
}

/// MQTT section of a device profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttTransportConfiguration {
    /// Topic filter devices publish telemetry on
    pub device_telemetry_topic: String,
    /// Topic filter devices publish attributes on
    pub device_attributes_topic: String,
    /// Payload encoding settings
    #[serde(default)]
    pub transport_payload_type_configuration: PayloadTypeConfiguration,
}

/// Payload encoding settings of an MQTT profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transportPayloadType", rename_all = "UPPERCASE")]
pub enum PayloadTypeConfiguration {
    /// JSON payloads
    #[default]
    Json,
    /// Protobuf payloads described by proto3 schemas
    Protobuf(ProtoPayloadConfiguration),
}

/// Proto3 schemas for every message kind a device exchanges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtoPayloadConfiguration {
    /// Schema of uplink telemetry
    pub device_telemetry_proto_schema: String,
    /// Schema of uplink attribute updates
    pub device_attributes_proto_schema: String,
    /// Schema of RPC responses sent by the device
    pub device_rpc_response_proto_schema: String,
    /// Schema of RPC requests sent to the device
    pub device_rpc_request_proto_schema: String,
    /// Accept JSON payloads when protobuf decoding fails
    #[serde(default)]
    pub enable_compatibility_with_json_payload_format: bool,
}

/// LwM2M section of a device profile, kept as raw JSON properties
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lwm2mTransportConfiguration {
    /// Raw properties (`observeAttr`, `clientLwM2mSettings`, `bootstrap`, ...)
    #[serde(flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl DeviceProfile {
    /// Create a profile with the given transport configuration
    pub fn new(
        id: ProfileId,
        name: impl Into<String>,
        transport: Option<TransportConfiguration>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            profile_data: DeviceProfileData {
                transport_configuration: transport,
            },
        }
    }

    /// Transport configuration of this profile, if any
    #[must_use]
    pub fn transport_configuration(&self) -> Option<&TransportConfiguration> {
        self.profile_data.transport_configuration.as_ref()
    }
}

impl PayloadTypeConfiguration {
    /// Encoding selected by this configuration
    #[must_use]
    pub const fn payload_type(&self) -> TransportPayloadType {
        match self {
            Self::Json => TransportPayloadType::Json,
            Self::Protobuf(_) => TransportPayloadType::Protobuf,
        }
    }
}
