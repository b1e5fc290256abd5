//! Runtime assembly tests

use std::sync::Arc;

use iotedge::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;

/// Accepts every identity without security, with one fixed profile
#[derive(Debug)]
struct AcceptAll(DeviceProfile);

impl SecurityValidator for AcceptAll {
    fn validate(&self, _identity: &str, _role: ServerRole) -> ValidationResult {
        ValidationResult {
            security_mode: SecurityMode::NoSec,
            security_info: None,
            device_profile: Some(self.0.clone()),
            device: None,
        }
    }
}

#[derive(Debug)]
struct NoStore;

impl SecurityStore for NoStore {
    fn remove(&self, _: &str, _: bool) -> Result<Option<SecurityInfo>, SecurityStoreError> {
        Ok(None)
    }
}

fn lwm2m_profile() -> DeviceProfile {
    let mut properties = serde_json::Map::new();
    properties.insert("observeAttr".into(), json!({ "observe": ["/3/0/9"] }));
    DeviceProfile::new(
        ProfileId(Uuid::new_v4()),
        "lwm2m",
        Some(TransportConfiguration::Lwm2m(Lwm2mTransportConfiguration {
            properties,
        })),
    )
}

fn runtime(config: EdgeConfig) -> iotedge::iotedge_core::Result<EdgeRuntime> {
    EdgeRuntime::new(config, Arc::new(AcceptAll(lwm2m_profile())), Arc::new(NoStore))
}

#[test]
fn test_components_follow_activation_predicates() {
    let cases = [
        (ServiceType::Monolith, true, true, true, true),
        (ServiceType::Transport, true, false, true, false),
        (ServiceType::Transport, false, true, false, true),
        (ServiceType::Core, true, true, false, false),
    ];

    for (service_type, lwm2m, mqtt, expect_lwm2m, expect_mqtt) in cases {
        let config = EdgeConfigBuilder::new()
            .service_type(service_type)
            .lwm2m_enabled(lwm2m)
            .mqtt_enabled(mqtt)
            .build();
        let runtime = runtime(config).unwrap();

        assert_eq!(
            (runtime.lwm2m().is_some(), runtime.mqtt().is_some()),
            (expect_lwm2m, expect_mqtt),
            "{service_type:?} lwm2m={lwm2m} mqtt={mqtt}"
        );
    }
}

#[test]
fn test_lwm2m_registry_is_usable() {
    let config = EdgeConfigBuilder::new()
        .service_type(ServiceType::Transport)
        .lwm2m_enabled(true)
        .build();
    let runtime = runtime(config).unwrap();
    let registry = runtime.lwm2m().unwrap();

    let session = registry
        .promote_to_registration(&Registration::new("R7", "meter-7"))
        .unwrap();
    assert_eq!(
        registry.lookup_by_registration_id("R7").unwrap().session_id(),
        session.session_id()
    );

    assert!(runtime.on_device_profile_update(&lwm2m_profile()));
    assert!(!runtime.on_device_profile_update(&DeviceProfile::new(
        ProfileId(Uuid::new_v4()),
        "bare",
        None
    )));
}

#[test]
fn test_mqtt_sessions_use_configured_default_topics() {
    let config = EdgeConfigBuilder::new()
        .default_topics("gw/telemetry", "gw/attributes")
        .unwrap()
        .build();
    let runtime = runtime(config).unwrap();
    let session = runtime.mqtt().unwrap().new_session();

    assert!(session.is_device_telemetry_topic("gw/telemetry"));
    assert!(session.is_device_attributes_topic("gw/attributes"));
    assert!(!session.is_device_telemetry_topic("v1/devices/me/telemetry"));
}

#[test]
fn test_profile_updates_ignored_without_lwm2m() {
    let runtime = runtime(EdgeConfig::default()).unwrap();
    assert!(runtime.lwm2m().is_none());
    assert!(!runtime.on_device_profile_update(&lwm2m_profile()));
}

#[test]
fn test_invalid_configuration_rejected() {
    let mut config = EdgeConfig::default();
    config.mqtt.default_telemetry_topic.clear();

    let err = runtime(config).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);
    assert_eq!(err.context.operation.as_deref(), Some("validate_config"));
}

#[test]
fn test_invalid_default_topic_filter_rejected() {
    let mut config = EdgeConfig::default();
    config.mqtt.default_telemetry_topic = "a/#/b".to_string();

    let err = runtime(config).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Schema);
    assert_eq!(err.context.operation.as_deref(), Some("build_mqtt_transport"));
    assert_eq!(err.context.component.as_deref(), Some("mqtt-schema"));
}

#[test]
fn test_init_tracing_is_idempotent() {
    let logging = LoggingConfig::default();
    let _first = init_tracing(&logging);
    assert!(!init_tracing(&logging));
}
