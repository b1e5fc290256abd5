//! Edge configuration and transport activation predicates.
//!
//! Which transports run on a node is decided once, at startup, from
//! [`EdgeConfig`]. The predicates [`EdgeConfig::lwm2m_transport_active`] and
//! [`EdgeConfig::mqtt_transport_active`] are the only place that decision is
//! made; runtime assembly consults them and nothing else.
//!
//! # Examples
//!
//! ```
//! use iotedge_core::config::{EdgeConfigBuilder, ServiceType};
//!
//! let config = EdgeConfigBuilder::new()
//!     .service_type(ServiceType::Transport)
//!     .lwm2m_enabled(true)
//!     .mqtt_enabled(false)
//!     .build();
//!
//! assert!(config.lwm2m_transport_active());
//! assert!(!config.mqtt_transport_active());
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default telemetry topic for devices without an MQTT profile section
pub const DEFAULT_TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";

/// Default attributes topic for devices without an MQTT profile section
pub const DEFAULT_ATTRIBUTES_TOPIC: &str = "v1/devices/me/attributes";

/// Role of this node in the deployment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    /// Dedicated transport node
    Transport,
    /// All services in one process
    #[default]
    Monolith,
    /// Core node without device-facing transports
    Core,
}

/// Top-level edge configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Role of this node
    pub service_type: ServiceType,
    /// LwM2M transport settings
    pub lwm2m: Lwm2mTransportConfig,
    /// MQTT transport settings
    pub mqtt: MqttTransportConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// LwM2M transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lwm2mTransportConfig {
    /// Whether the LwM2M transport runs on this node
    pub enabled: bool,
    /// Endpoint used for the placeholder credential handed out on rejection
    pub rejection_endpoint: String,
    /// PSK identity of the placeholder credential
    pub rejection_identity: String,
}

/// MQTT transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttTransportConfig {
    /// Whether the MQTT transport runs on this node
    pub enabled: bool,
    /// Telemetry topic used when a profile has no MQTT section
    pub default_telemetry_topic: String,
    /// Attributes topic used when a profile has no MQTT section
    pub default_attributes_topic: String,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for Lwm2mTransportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rejection_endpoint: "error".to_string(),
            rejection_identity: "error_identity".to_string(),
        }
    }
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_telemetry_topic: DEFAULT_TELEMETRY_TOPIC.to_string(),
            default_attributes_topic: DEFAULT_ATTRIBUTES_TOPIC.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ServiceType {
    /// Whether device-facing transports may run in this role
    #[must_use]
    pub const fn hosts_transports(self) -> bool {
        matches!(self, Self::Transport | Self::Monolith)
    }
}

impl EdgeConfig {
    /// Load configuration from an optional file plus `IOTEDGE__*` environment
    /// overrides (for example `IOTEDGE__LWM2M__ENABLED=true`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix("IOTEDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no transport could run with
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.default_telemetry_topic.is_empty() {
            return Err(Error::configuration("mqtt.default_telemetry_topic is empty"));
        }
        if self.mqtt.default_attributes_topic.is_empty() {
            return Err(Error::configuration("mqtt.default_attributes_topic is empty"));
        }
        if self.lwm2m.rejection_endpoint.is_empty() {
            return Err(Error::configuration("lwm2m.rejection_endpoint is empty"));
        }
        Ok(())
    }

    /// Whether the LwM2M session registry is created on this node
    #[must_use]
    pub const fn lwm2m_transport_active(&self) -> bool {
        self.service_type.hosts_transports() && self.lwm2m.enabled
    }

    /// Whether MQTT session support is created on this node
    #[must_use]
    pub const fn mqtt_transport_active(&self) -> bool {
        self.service_type.hosts_transports() && self.mqtt.enabled
    }
}

/// Configuration builder for edge settings
#[derive(Debug, Default)]
pub struct EdgeConfigBuilder {
    config: EdgeConfig,
}

impl EdgeConfigBuilder {
    /// Create a new configuration builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node role
    #[must_use]
    pub const fn service_type(mut self, service_type: ServiceType) -> Self {
        self.config.service_type = service_type;
        self
    }

    /// Enable or disable the LwM2M transport
    #[must_use]
    pub const fn lwm2m_enabled(mut self, enabled: bool) -> Self {
        self.config.lwm2m.enabled = enabled;
        self
    }

    /// Enable or disable the MQTT transport
    #[must_use]
    pub const fn mqtt_enabled(mut self, enabled: bool) -> Self {
        self.config.mqtt.enabled = enabled;
        self
    }

    /// Set the fallback MQTT topics
    pub fn default_topics(
        mut self,
        telemetry: impl Into<String>,
        attributes: impl Into<String>,
    ) -> Result<Self> {
        let telemetry = telemetry.into();
        let attributes = attributes.into();
        if telemetry.is_empty() || attributes.is_empty() {
            return Err(Error::configuration("default topics cannot be empty"));
        }
        self.config.mqtt.default_telemetry_topic = telemetry;
        self.config.mqtt.default_attributes_topic = attributes;
        Ok(self)
    }

    /// Set the log filter directive
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Emit JSON log lines
    #[must_use]
    pub const fn json_logs(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> EdgeConfig {
        self.config
    }
}
