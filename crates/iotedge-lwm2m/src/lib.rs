//! # iotedge LwM2M
//!
//! Session registry for devices speaking LwM2M over DTLS.
//!
//! ## Features
//!
//! - **Credential resolution** - validates an identity on first contact and
//!   fails closed with a placeholder descriptor on any rejection
//! - **Registration re-keying** - moves a session from its endpoint key to
//!   its registration-id key once the handshake completes
//! - **Client profiles** - compiles device profiles into immutable LwM2M
//!   views and swaps them atomically per profile id
//! - **Teardown** - removes the session and revokes its security-store entry
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use iotedge_core::config::Lwm2mTransportConfig;
//! use iotedge_lwm2m::{
//!     Registration, SecurityInfo, SecurityMode, SecurityStore, SecurityStoreError,
//!     SecurityValidator, ServerRole, SessionRegistry, ValidationResult,
//! };
//! # use iotedge_core::{DeviceProfile, ProfileId, TransportConfiguration};
//! # use iotedge_core::profile::Lwm2mTransportConfiguration;
//!
//! struct NoSecValidator(DeviceProfile);
//! impl SecurityValidator for NoSecValidator {
//!     fn validate(&self, _identity: &str, _role: ServerRole) -> ValidationResult {
//!         ValidationResult {
//!             security_mode: SecurityMode::NoSec,
//!             security_info: None,
//!             device_profile: Some(self.0.clone()),
//!             device: None,
//!         }
//!     }
//! }
//!
//! struct NoStore;
//! impl SecurityStore for NoStore {
//!     fn remove(&self, _: &str, _: bool) -> Result<Option<SecurityInfo>, SecurityStoreError> {
//!         Ok(None)
//!     }
//! }
//!
//! # let mut properties = serde_json::Map::new();
//! # properties.insert("observeAttr".into(), serde_json::json!({}));
//! # let profile = DeviceProfile::new(
//! #     ProfileId(uuid::Uuid::new_v4()),
//! #     "sensors",
//! #     Some(TransportConfiguration::Lwm2m(Lwm2mTransportConfiguration { properties })),
//! # );
//! let registry = SessionRegistry::new(
//!     Arc::new(NoSecValidator(profile)),
//!     Arc::new(NoStore),
//!     &Lwm2mTransportConfig::default(),
//! );
//!
//! let session = registry
//!     .promote_to_registration(&Registration::new("R1", "sensor-7"))
//!     .unwrap();
//! assert_eq!(registry.session_keys(session.session_id()), vec!["R1".to_string()]);
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

pub mod client;
pub mod error;
pub mod profile;
pub mod registry;
pub mod security;

pub use client::{Lwm2mClient, Registration, SessionState};
pub use error::{RegistryError, RegistryResult, SecurityStoreError};
pub use profile::{ClientSettings, Lwm2mClientProfile, ObserveAttributes, ProfileCompiler};
pub use registry::{ProfileMap, SessionRegistry};
pub use security::{
    Credential, DeviceInfo, RejectReason, SecurityInfo, SecurityMode, SecurityResolution,
    SecurityStore, SecurityValidator, ServerRole, ValidationResult,
};
