//! Compiled LwM2M client profiles.
//!
//! A [`Lwm2mClientProfile`] is the immutable view of a device profile the
//! LwM2M handlers read at message time. It is only ever replaced whole.

use std::collections::BTreeMap;

use iotedge_core::profile::Lwm2mTransportConfiguration;
use iotedge_core::{DeviceProfile, ProfileId, TransportConfiguration};
use serde::{Deserialize, Serialize};
use tracing::debug;

const OBSERVE_ATTR: &str = "observeAttr";
const CLIENT_SETTINGS: &str = "clientLwM2mSettings";

/// Observation and reporting rules of a profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObserveAttributes {
    /// Resource path to telemetry/attribute key name (`/3/0/0` -> `manufacturer`)
    pub key_name: BTreeMap<String, String>,
    /// Resource paths observed after registration
    pub observe: Vec<String>,
    /// Resource paths reported as attributes
    pub attribute: Vec<String>,
    /// Resource paths reported as telemetry
    pub telemetry: Vec<String>,
    /// LwM2M write-attributes (`pmin`, `pmax`, ...) keyed by path
    pub attribute_lwm2m: serde_json::Map<String, serde_json::Value>,
}

/// Per-profile client behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Read strategy after registration (1: only observed, 2: all)
    pub client_strategy: u8,
    /// Push current values to the device after it connects
    pub client_update_value_after_connect: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            client_strategy: 1,
            client_update_value_after_connect: false,
        }
    }
}

/// Compiled, immutable LwM2M view of a device profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lwm2mClientProfile {
    profile_id: ProfileId,
    settings: ClientSettings,
    observe_attr: ObserveAttributes,
}

impl Lwm2mClientProfile {
    /// Profile this view was compiled from
    #[must_use]
    pub const fn profile_id(&self) -> ProfileId {
        self.profile_id
    }

    /// Client behaviour settings
    #[must_use]
    pub const fn settings(&self) -> ClientSettings {
        self.settings
    }

    /// Observation and reporting rules
    #[must_use]
    pub const fn observe_attributes(&self) -> &ObserveAttributes {
        &self.observe_attr
    }

    /// Whether `path` is observed after registration
    #[must_use]
    pub fn is_observed(&self, path: &str) -> bool {
        self.observe_attr.observe.iter().any(|p| p == path)
    }

    /// Whether `path` reports telemetry
    #[must_use]
    pub fn is_telemetry(&self, path: &str) -> bool {
        self.observe_attr.telemetry.iter().any(|p| p == path)
    }

    /// Whether `path` reports an attribute
    #[must_use]
    pub fn is_attribute(&self, path: &str) -> bool {
        self.observe_attr.attribute.iter().any(|p| p == path)
    }

    /// Key name configured for `path`
    #[must_use]
    pub fn key_name(&self, path: &str) -> Option<&str> {
        self.observe_attr.key_name.get(path).map(String::as_str)
    }
}

/// Turns raw device profiles into [`Lwm2mClientProfile`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileCompiler;

impl ProfileCompiler {
    /// Compile `profile`.
    ///
    /// Returns `None` when the profile has no LwM2M transport section or the
    /// section lacks a usable `observeAttr` block.
    #[must_use]
    pub fn compile(profile: &DeviceProfile) -> Option<Lwm2mClientProfile> {
        let Some(TransportConfiguration::Lwm2m(section)) = profile.transport_configuration() else {
            debug!(profile_id = %profile.id, "profile has no LwM2M transport section");
            return None;
        };
        Self::compile_section(profile.id, section)
    }

    fn compile_section(
        profile_id: ProfileId,
        section: &Lwm2mTransportConfiguration,
    ) -> Option<Lwm2mClientProfile> {
        let observe_attr = match section.properties.get(OBSERVE_ATTR) {
            Some(value) => match ObserveAttributes::deserialize(value) {
                Ok(attrs) => attrs,
                Err(err) => {
                    debug!(%profile_id, error = %err, "malformed observeAttr section");
                    return None;
                }
            },
            None => {
                debug!(%profile_id, "profile has no observeAttr section");
                return None;
            }
        };

        let settings = section
            .properties
            .get(CLIENT_SETTINGS)
            .and_then(|value| ClientSettings::deserialize(value).ok())
            .unwrap_or_default();

        Some(Lwm2mClientProfile {
            profile_id,
            settings,
            observe_attr,
        })
    }
}
