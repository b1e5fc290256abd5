//! Runtime assembly from the transport activation predicates.

use std::sync::Arc;

use iotedge_core::config::MqttTransportConfig;
use iotedge_core::{DeviceProfile, EdgeConfig, Result, SessionId};
use iotedge_lwm2m::{SecurityStore, SecurityValidator, SessionRegistry};
use iotedge_mqtt::{AdaptorSet, StreamSession, TopicFilterResolver};
use tracing::{debug, info};

/// Shared MQTT state: default topic filters and payload adaptors
#[derive(Debug, Clone)]
pub struct MqttTransport {
    resolver: Arc<TopicFilterResolver>,
    adaptors: AdaptorSet,
}

impl MqttTransport {
    /// Build from the node's MQTT settings
    pub fn new(config: &MqttTransportConfig) -> Result<Self> {
        let resolver = TopicFilterResolver::new(
            &config.default_telemetry_topic,
            &config.default_attributes_topic,
        )?;
        Ok(Self {
            resolver: Arc::new(resolver),
            adaptors: AdaptorSet::new(),
        })
    }

    /// Topic filter resolver shared by every session
    #[must_use]
    pub const fn resolver(&self) -> &Arc<TopicFilterResolver> {
        &self.resolver
    }

    /// Payload adaptors shared by every session
    #[must_use]
    pub const fn adaptors(&self) -> &AdaptorSet {
        &self.adaptors
    }

    /// State for a newly connected device
    #[must_use]
    pub fn new_session(&self) -> StreamSession {
        let session_id = SessionId::random();
        debug!(session_id = %session_id.0, "mqtt session created");
        StreamSession::new(session_id, Arc::clone(&self.resolver))
    }
}

/// Transport components enabled on this node.
///
/// Each component exists only when its activation predicate on
/// [`EdgeConfig`] holds.
pub struct EdgeRuntime {
    config: EdgeConfig,
    lwm2m: Option<Arc<SessionRegistry>>,
    mqtt: Option<MqttTransport>,
}

impl std::fmt::Debug for EdgeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeRuntime")
            .field("service_type", &self.config.service_type)
            .field("lwm2m", &self.lwm2m)
            .field("mqtt", &self.mqtt.is_some())
            .finish()
    }
}

impl EdgeRuntime {
    /// Assemble the runtime for `config`.
    ///
    /// `validator` and `store` are only used when the LwM2M transport is
    /// active.
    pub fn new(
        config: EdgeConfig,
        validator: Arc<dyn SecurityValidator>,
        store: Arc<dyn SecurityStore>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|err| err.with_operation("validate_config"))?;

        let lwm2m = config
            .lwm2m_transport_active()
            .then(|| Arc::new(SessionRegistry::new(validator, store, &config.lwm2m)));
        let mqtt = if config.mqtt_transport_active() {
            Some(
                MqttTransport::new(&config.mqtt)
                    .map_err(|err| err.with_operation("build_mqtt_transport"))?,
            )
        } else {
            None
        };

        info!(
            service_type = ?config.service_type,
            lwm2m = lwm2m.is_some(),
            mqtt = mqtt.is_some(),
            "edge runtime assembled"
        );

        Ok(Self {
            config,
            lwm2m,
            mqtt,
        })
    }

    /// Configuration the runtime was built from
    #[must_use]
    pub const fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// LwM2M session registry, when the transport is active
    #[must_use]
    pub const fn lwm2m(&self) -> Option<&Arc<SessionRegistry>> {
        self.lwm2m.as_ref()
    }

    /// MQTT state, when the transport is active
    #[must_use]
    pub const fn mqtt(&self) -> Option<&MqttTransport> {
        self.mqtt.as_ref()
    }

    /// Feed a device-profile change to the LwM2M registry.
    ///
    /// Returns whether the registry accepted the profile. MQTT sessions apply
    /// updates themselves through [`StreamSession::on_device_profile_update`].
    pub fn on_device_profile_update(&self, profile: &DeviceProfile) -> bool {
        self.lwm2m
            .as_ref()
            .is_some_and(|registry| registry.bind_profile(profile))
    }
}
