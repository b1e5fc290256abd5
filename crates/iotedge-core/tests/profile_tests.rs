//! Profile documents as delivered by the change feed

use iotedge_core::{
    DeviceProfile, PayloadTypeConfiguration, ProfileId, SessionId, SessionInfo,
    TransportConfiguration, TransportPayloadType,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

#[test]
fn test_mqtt_profile_defaults_to_json_payloads() {
    let profile: DeviceProfile = serde_json::from_value(json!({
        "id": Uuid::new_v4(),
        "name": "plain",
        "profileData": {
            "transportConfiguration": {
                "type": "MQTT",
                "deviceTelemetryTopic": "v1/devices/me/telemetry",
                "deviceAttributesTopic": "v1/devices/me/attributes"
            }
        }
    }))
    .unwrap();

    let Some(TransportConfiguration::Mqtt(mqtt)) = profile.transport_configuration() else {
        panic!("expected MQTT transport configuration");
    };
    assert_eq!(
        mqtt.transport_payload_type_configuration,
        PayloadTypeConfiguration::Json
    );
    assert_eq!(
        mqtt.transport_payload_type_configuration.payload_type(),
        TransportPayloadType::Json
    );
}

#[test]
fn test_profile_survives_serialization() {
    let profile: DeviceProfile = serde_json::from_value(json!({
        "id": Uuid::new_v4(),
        "name": "meter",
        "profileData": {
            "transportConfiguration": {
                "type": "LWM2M",
                "observeAttr": { "observe": ["/3/0/9"], "telemetry": ["/3/0/9"] },
                "clientLwM2mSettings": { "clientStrategy": 2 }
            }
        }
    }))
    .unwrap();

    let text = serde_json::to_string(&profile).unwrap();
    let back: DeviceProfile = serde_json::from_str(&text).unwrap();
    assert_eq!(back, profile);
}

#[test]
fn test_transport_types_without_settings() {
    for (tag, expected) in [
        ("DEFAULT", TransportConfiguration::Default),
        ("COAP", TransportConfiguration::Coap),
    ] {
        let profile: DeviceProfile = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "name": tag,
            "profileData": { "transportConfiguration": { "type": tag } }
        }))
        .unwrap();
        assert_eq!(profile.transport_configuration(), Some(&expected));
    }
}

#[test]
fn test_unknown_transport_type_rejected() {
    let parsed = serde_json::from_value::<DeviceProfile>(json!({
        "id": Uuid::new_v4(),
        "name": "snmp",
        "profileData": { "transportConfiguration": { "type": "SNMP" } }
    }));
    assert!(parsed.is_err());
}

#[test]
fn test_session_info_resolves_same_id() {
    let id = SessionId::random();
    let info = id.to_session_info();

    let wire = serde_json::to_value(info).unwrap();
    let back: SessionInfo = serde_json::from_value(wire).unwrap();

    assert_eq!(back.session_id(), id);
    assert_eq!(SessionId::from_halves(info.session_id_msb, info.session_id_lsb), id);
}

#[test]
fn test_profile_ids_compare_by_uuid() {
    let uuid = Uuid::new_v4();
    assert_eq!(ProfileId::new(uuid), ProfileId::from(uuid));
    assert_eq!(ProfileId::new(uuid).to_string(), uuid.to_string());
}
