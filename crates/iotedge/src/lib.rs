//! # iotedge
//!
//! Device-session and security-context registry for an IoT edge gateway.
//!
//! The gateway keeps one registry per transport:
//!
//! - **LwM2M** ([`SessionRegistry`]) - resolves DTLS identities to sessions,
//!   re-keys them by registration id and tears them down
//! - **MQTT** ([`StreamSession`]) - per-connection topic filters, schemas,
//!   payload adaptor and a queue of messages waiting for the session
//!
//! [`EdgeRuntime`] creates each of them only when the node's [`EdgeConfig`]
//! activates the transport.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use iotedge::prelude::*;
//!
//! #[derive(Debug)]
//! struct Unused;
//! impl SecurityValidator for Unused {
//!     fn validate(&self, _: &str, _: ServerRole) -> ValidationResult {
//!         ValidationResult::refused()
//!     }
//! }
//! impl SecurityStore for Unused {
//!     fn remove(&self, _: &str, _: bool) -> Result<Option<SecurityInfo>, SecurityStoreError> {
//!         Ok(None)
//!     }
//! }
//!
//! let config = EdgeConfigBuilder::new()
//!     .service_type(ServiceType::Transport)
//!     .lwm2m_enabled(false)
//!     .mqtt_enabled(true)
//!     .build();
//! let runtime = EdgeRuntime::new(config, Arc::new(Unused), Arc::new(Unused)).unwrap();
//!
//! assert!(runtime.lwm2m().is_none());
//! let mqtt = runtime.mqtt().unwrap();
//! let session = mqtt.new_session();
//! assert_eq!(session.payload_adaptor(mqtt.adaptors()).kind(), AdaptorKind::Json);
//! ```

#![deny(missing_docs)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod runtime;
pub mod telemetry;

pub use runtime::{EdgeRuntime, MqttTransport};
pub use telemetry::init_tracing;

pub use iotedge_core;
pub use iotedge_lwm2m;
pub use iotedge_mqtt;

/// Common imports for gateway code
pub mod prelude {
    pub use super::{EdgeRuntime, MqttTransport, init_tracing};

    pub use iotedge_core::config::{EdgeConfigBuilder, ServiceType};
    pub use iotedge_core::profile::Lwm2mTransportConfiguration;
    pub use iotedge_core::{
        DeviceProfile, EdgeConfig, Error, ErrorKind, InboundMessage, LoggingConfig, ProfileId,
        Releasable, SessionId, TransportConfiguration,
    };

    pub use iotedge_lwm2m::{
        Lwm2mClient, Registration, SecurityInfo, SecurityMode, SecurityResolution, SecurityStore,
        SecurityStoreError, SecurityValidator, ServerRole, SessionRegistry, ValidationResult,
    };

    pub use iotedge_mqtt::{
        AdaptorKind, AdaptorSet, DrainOutcome, PayloadAdaptor, RpcRequest, StreamSession,
        TopicFilterResolver,
    };
}
