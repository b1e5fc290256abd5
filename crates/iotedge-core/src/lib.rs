//! # iotedge core
//!
//! Foundation crate for the iotedge device-session registry. It holds the
//! pieces both transports agree on:
//!
//! - **Error model** - boxed, classified errors with context ([`Error`], [`ErrorKind`])
//! - **Identifiers** - session ids and their two-halves wire form, profile ids
//! - **Device profiles** - the raw profile document delivered by the change feed
//! - **Message ownership** - [`Releasable`] and [`BufferLease`] for explicit
//!   retain/release handoff between the network layer and session queues
//! - **Configuration** - [`EdgeConfig`] and the transport activation predicates
//!
//! ## Architecture
//!
//! ```text
//! iotedge-core/
//! ├── error/          # Error types and handling
//! ├── types/          # Session and profile identifiers
//! ├── profile/        # Raw device-profile model
//! ├── message/        # Inbound messages and buffer leases
//! └── config/         # Edge configuration and activation predicates
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod config;
pub mod error;
pub mod message;
pub mod profile;
pub mod types;

pub use config::{EdgeConfig, EdgeConfigBuilder, LoggingConfig, ServiceType};
pub use error::{Error, ErrorKind, Result};
pub use message::{BufferLease, InboundMessage, Releasable};
pub use profile::{
    DeviceProfile, MqttTransportConfiguration, PayloadTypeConfiguration,
    ProtoPayloadConfiguration, TransportConfiguration, TransportPayloadType,
};
pub use types::{ProfileId, SessionId, SessionInfo, Timestamp};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
