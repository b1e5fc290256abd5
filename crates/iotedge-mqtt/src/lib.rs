//! # iotedge MQTT
//!
//! Per-connection state for devices publishing over MQTT.
//!
//! ## Features
//!
//! - **Topic filters** - telemetry and attribute filters from the device
//!   profile, with `+` and `#` wildcards
//! - **Message queue** - parks messages received before the session is
//!   ready and drains them from one thread at a time
//! - **Payload schemas** - compiles the proto3 schemas of protobuf profiles
//! - **Payload adaptors** - JSON, protobuf, or protobuf with JSON fallback,
//!   chosen from the session's current configuration
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use iotedge_core::{InboundMessage, BufferLease, SessionId};
//! use iotedge_mqtt::{AdaptorKind, AdaptorSet, StreamSession, TopicFilterResolver};
//!
//! let adaptors = AdaptorSet::new();
//! let session: StreamSession =
//!     StreamSession::new(SessionId::random(), Arc::new(TopicFilterResolver::default()));
//!
//! assert!(session.is_device_telemetry_topic("v1/devices/me/telemetry"));
//! assert_eq!(session.payload_adaptor(&adaptors).kind(), AdaptorKind::Json);
//!
//! let lease = BufferLease::new();
//! session.enqueue(InboundMessage::new(
//!     "v1/devices/me/telemetry",
//!     bytes::Bytes::from_static(br#"{"temperature":21}"#),
//!     lease.clone(),
//! ));
//! let outcome = session.try_process_queued(|msg| {
//!     let config = session.config();
//!     session
//!         .payload_adaptor(&adaptors)
//!         .convert_telemetry(&config, &msg.payload)
//!         .map(|_| ())
//! });
//! assert_eq!(outcome.processed(), 1);
//! assert_eq!(lease.ref_count(), 1);
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

pub mod adaptor;
pub mod error;
pub mod queue;
pub mod schema;
pub mod session;
pub mod topic;

pub use adaptor::{
    AdaptorKind, AdaptorSet, BackwardCompatibilityAdaptor, JsonAdaptor, PayloadAdaptor,
    ProtoAdaptor, RpcRequest,
};
pub use error::{AdaptorError, SchemaError};
pub use queue::{DrainOutcome, SessionMessageQueue};
pub use schema::{
    Cardinality, DEFAULT_RPC_REQUEST_SCHEMA, EnumDescriptor, FieldDescriptor, FieldType,
    MessageDescriptor, RpcRequestTemplate, ScalarType, SessionSchemas,
};
pub use session::{StreamSession, StreamSessionConfig};
pub use topic::{MAX_QOS, QosSubscriptions, ResolvedFilters, TopicFilter, TopicFilterResolver};
