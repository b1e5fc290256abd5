//! Shared fixtures for registry tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use iotedge_core::config::Lwm2mTransportConfig;
use iotedge_core::profile::Lwm2mTransportConfiguration;
use iotedge_core::{DeviceProfile, ProfileId, TransportConfiguration};
use iotedge_lwm2m::{
    SecurityInfo, SecurityMode, SecurityStore, SecurityStoreError, SecurityValidator, ServerRole,
    SessionRegistry, ValidationResult,
};
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

/// Validator answering from a fixed table, refusing unknown identities
#[derive(Debug, Default)]
pub struct TableValidator {
    answers: HashMap<String, ValidationResult>,
    pub calls: AtomicUsize,
}

impl TableValidator {
    pub fn with(mut self, identity: &str, result: ValidationResult) -> Self {
        self.answers.insert(identity.to_string(), result);
        self
    }
}

impl SecurityValidator for TableValidator {
    fn validate(&self, identity: &str, _role: ServerRole) -> ValidationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .get(identity)
            .cloned()
            .unwrap_or_else(ValidationResult::refused)
    }
}

/// Store recording every removal, optionally failing them
#[derive(Debug, Default)]
pub struct RecordingStore {
    pub removed: Mutex<Vec<(String, bool)>>,
    pub fail: bool,
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            removed: Mutex::new(Vec::new()),
            fail: true,
        }
    }
}

impl SecurityStore for RecordingStore {
    fn remove(
        &self,
        endpoint: &str,
        infos_are_compromised: bool,
    ) -> Result<Option<SecurityInfo>, SecurityStoreError> {
        self.removed
            .lock()
            .push((endpoint.to_string(), infos_are_compromised));
        if self.fail {
            return Err(SecurityStoreError::Unavailable("connection refused".into()));
        }
        Ok(None)
    }
}

/// Profile with a compilable LwM2M section
pub fn lwm2m_profile(id: ProfileId, observed: &[&str]) -> DeviceProfile {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "observeAttr".into(),
        json!({ "observe": observed, "telemetry": observed }),
    );
    DeviceProfile::new(
        id,
        "lwm2m-profile",
        Some(TransportConfiguration::Lwm2m(Lwm2mTransportConfiguration {
            properties,
        })),
    )
}

/// Profile without any transport section
pub fn bare_profile(id: ProfileId) -> DeviceProfile {
    DeviceProfile::new(id, "bare", None)
}

pub fn profile_id() -> ProfileId {
    ProfileId(Uuid::new_v4())
}

pub fn no_sec(profile: DeviceProfile) -> ValidationResult {
    ValidationResult {
        security_mode: SecurityMode::NoSec,
        security_info: None,
        device_profile: Some(profile),
        device: None,
    }
}

pub fn psk(endpoint: &str, identity: &str, profile: DeviceProfile) -> ValidationResult {
    ValidationResult {
        security_mode: SecurityMode::Psk,
        security_info: Some(SecurityInfo::pre_shared_key(
            endpoint,
            identity,
            vec![0xde, 0xad, 0xbe, 0xef],
        )),
        device_profile: Some(profile),
        device: None,
    }
}

pub fn registry(
    validator: TableValidator,
    store: Arc<RecordingStore>,
) -> (SessionRegistry, Arc<TableValidator>) {
    let validator = Arc::new(validator);
    let registry = SessionRegistry::new(
        Arc::clone(&validator) as Arc<dyn SecurityValidator>,
        store,
        &Lwm2mTransportConfig::default(),
    );
    (registry, validator)
}
