//! MQTT device session context.
//!
//! Everything a session derives from its device profile lives in one
//! [`StreamSessionConfig`] snapshot behind an [`ArcSwap`]. A profile update
//! builds the next snapshot completely and publishes it with a single store,
//! so a reader on another connection thread sees either the old or the new
//! configuration, never a mix.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use arc_swap::ArcSwap;
use iotedge_core::{
    DeviceProfile, InboundMessage, PayloadTypeConfiguration, ProfileId, Releasable, SessionId,
    TransportConfiguration, TransportPayloadType,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::adaptor::{AdaptorSet, PayloadAdaptor};
use crate::error::SchemaError;
use crate::queue::{DrainOutcome, SessionMessageQueue};
use crate::schema::SessionSchemas;
use crate::topic::{QosSubscriptions, ResolvedFilters, TopicFilterResolver};

/// Immutable per-session configuration derived from a device profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSessionConfig {
    /// Profile the configuration was built from, absent before the first one
    pub profile_id: Option<ProfileId>,
    /// Telemetry/attributes filters and payload encoding
    pub filters: ResolvedFilters,
    /// Compiled schemas, present for protobuf sessions
    pub schemas: Option<Arc<SessionSchemas>>,
    /// Fall back to JSON when a protobuf payload does not decode
    pub json_compatibility: bool,
}

impl StreamSessionConfig {
    /// Configuration of a session with no profile yet
    #[must_use]
    pub fn defaults(resolver: &TopicFilterResolver) -> Self {
        Self {
            profile_id: None,
            filters: resolver.defaults().clone(),
            schemas: None,
            json_compatibility: false,
        }
    }

    /// Build the configuration for `profile`
    pub fn compile(
        resolver: &TopicFilterResolver,
        profile: &DeviceProfile,
    ) -> Result<Self, SchemaError> {
        let filters = resolver.resolve(profile)?;
        let (schemas, json_compatibility) = match profile.transport_configuration() {
            Some(TransportConfiguration::Mqtt(mqtt)) => {
                match &mqtt.transport_payload_type_configuration {
                    PayloadTypeConfiguration::Protobuf(proto) => (
                        Some(Arc::new(SessionSchemas::compile(proto)?)),
                        proto.enable_compatibility_with_json_payload_format,
                    ),
                    PayloadTypeConfiguration::Json => (None, false),
                }
            }
            _ => (None, false),
        };
        Ok(Self {
            profile_id: Some(profile.id),
            filters,
            schemas,
            json_compatibility,
        })
    }

    /// Payload encoding of the session
    #[must_use]
    pub const fn payload_type(&self) -> TransportPayloadType {
        self.filters.payload_type
    }

    /// Whether payloads are plain JSON
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.payload_type() == TransportPayloadType::Json
    }
}

/// State of one connected MQTT device
pub struct StreamSession<M: Releasable = InboundMessage> {
    session_id: SessionId,
    msg_id_seq: AtomicU32,
    resolver: Arc<TopicFilterResolver>,
    config: ArcSwap<StreamSessionConfig>,
    queue: SessionMessageQueue<M>,
    subscriptions: QosSubscriptions,
    provision_only: AtomicBool,
    provision_payload_type: RwLock<TransportPayloadType>,
}

impl<M: Releasable> std::fmt::Debug for StreamSession<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("session_id", &self.session_id)
            .field("profile_id", &self.config.load().profile_id)
            .field("payload_type", &self.config.load().payload_type())
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl<M: Releasable> StreamSession<M> {
    /// New session using the resolver's default filters
    pub fn new(session_id: SessionId, resolver: Arc<TopicFilterResolver>) -> Self {
        let config = StreamSessionConfig::defaults(&resolver);
        Self {
            session_id,
            msg_id_seq: AtomicU32::new(0),
            resolver,
            config: ArcSwap::from_pointee(config),
            queue: SessionMessageQueue::new(),
            subscriptions: QosSubscriptions::new(),
            provision_only: AtomicBool::new(false),
            provision_payload_type: RwLock::new(TransportPayloadType::Json),
        }
    }

    /// Session id
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Next outbound message id, starting at 1
    pub fn next_msg_id(&self) -> u32 {
        self.msg_id_seq.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Current configuration snapshot
    #[must_use]
    pub fn config(&self) -> Arc<StreamSessionConfig> {
        self.config.load_full()
    }

    /// Profile the current configuration was built from
    #[must_use]
    pub fn profile_id(&self) -> Option<ProfileId> {
        self.config.load().profile_id
    }

    /// Whether `topic` carries telemetry for this session
    #[must_use]
    pub fn is_device_telemetry_topic(&self, topic: &str) -> bool {
        self.config.load().filters.telemetry.matches(topic)
    }

    /// Whether `topic` carries attribute updates for this session
    #[must_use]
    pub fn is_device_attributes_topic(&self, topic: &str) -> bool {
        self.config.load().filters.attributes.matches(topic)
    }

    /// Payload encoding in effect
    #[must_use]
    pub fn payload_type(&self) -> TransportPayloadType {
        self.config.load().payload_type()
    }

    /// Whether payloads are plain JSON
    #[must_use]
    pub fn is_json_payload_type(&self) -> bool {
        self.config.load().is_json()
    }

    /// Adaptor for the current configuration
    #[must_use]
    pub fn payload_adaptor(&self, adaptors: &AdaptorSet) -> Arc<dyn PayloadAdaptor> {
        adaptors.select(&self.config.load())
    }

    /// Attach the device profile the session was authorised with.
    ///
    /// When the profile's schemas fail to compile the previous
    /// configuration stays in place and the error is returned.
    pub fn set_device_profile(&self, profile: &DeviceProfile) -> Result<(), SchemaError> {
        self.apply_profile(profile)
    }

    /// Apply an upstream update of the session's profile.
    ///
    /// Updates for a different profile are ignored and return `Ok(false)`.
    pub fn on_device_profile_update(&self, profile: &DeviceProfile) -> Result<bool, SchemaError> {
        if let Some(current) = self.profile_id() {
            if current != profile.id {
                debug!(
                    session_id = %self.session_id.0,
                    current = %current,
                    update = %profile.id,
                    "ignoring update for another profile"
                );
                return Ok(false);
            }
        }
        self.set_device_profile(profile)?;
        Ok(true)
    }

    fn apply_profile(&self, profile: &DeviceProfile) -> Result<(), SchemaError> {
        match StreamSessionConfig::compile(&self.resolver, profile) {
            Ok(next) => {
                info!(
                    session_id = %self.session_id.0,
                    profile_id = %profile.id,
                    telemetry = %next.filters.telemetry,
                    attributes = %next.filters.attributes,
                    payload_type = ?next.payload_type(),
                    "session configuration updated"
                );
                self.config.store(Arc::new(next));
                Ok(())
            }
            Err(err) => {
                warn!(
                    session_id = %self.session_id.0,
                    profile_id = %profile.id,
                    error = %err,
                    "profile rejected, keeping previous session configuration"
                );
                Err(err)
            }
        }
    }

    /// Topic subscriptions of the session
    #[must_use]
    pub const fn subscriptions(&self) -> &QosSubscriptions {
        &self.subscriptions
    }

    /// Whether the session only accepts provisioning requests
    #[must_use]
    pub fn provision_only(&self) -> bool {
        self.provision_only.load(Ordering::Acquire)
    }

    /// Restrict the session to provisioning requests
    pub fn set_provision_only(&self, provision_only: bool) {
        self.provision_only.store(provision_only, Ordering::Release);
    }

    /// Payload encoding of provisioning requests
    #[must_use]
    pub fn provision_payload_type(&self) -> TransportPayloadType {
        *self.provision_payload_type.read()
    }

    /// Set the payload encoding of provisioning requests
    pub fn set_provision_payload_type(&self, payload_type: TransportPayloadType) {
        *self.provision_payload_type.write() = payload_type;
    }

    /// Park `message` until the session is ready
    pub fn enqueue(&self, message: M) {
        self.queue.enqueue(message);
    }

    /// Drain parked messages through `processor` unless another thread is
    pub fn try_process_queued<F, E>(&self, processor: F) -> DrainOutcome
    where
        F: FnMut(&M) -> Result<(), E>,
        E: std::fmt::Display,
    {
        self.queue.try_drain(processor)
    }

    /// Messages parked and not yet processed
    #[must_use]
    pub fn msg_queue_size(&self) -> usize {
        self.queue.len()
    }

    /// Read-only view of the parked messages, oldest first
    pub fn msg_queue_snapshot<R>(&self, view: impl FnMut(&M) -> R) -> Vec<R> {
        self.queue.snapshot(view)
    }

    /// Release every parked message on disconnect
    pub fn release(&self) -> usize {
        let discarded = self.queue.release();
        if discarded > 0 {
            debug!(session_id = %self.session_id.0, discarded, "session released");
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotedge_core::MqttTransportConfiguration;

    fn new_profile_id() -> ProfileId {
        ProfileId(SessionId::random().0)
    }

    fn mqtt_profile(id: ProfileId, telemetry: &str) -> DeviceProfile {
        DeviceProfile::new(
            id,
            "mqtt",
            Some(TransportConfiguration::Mqtt(MqttTransportConfiguration {
                device_telemetry_topic: telemetry.to_string(),
                device_attributes_topic: "devices/+/attributes".to_string(),
                transport_payload_type_configuration: PayloadTypeConfiguration::Json,
            })),
        )
    }

    fn session() -> StreamSession {
        StreamSession::new(SessionId::random(), Arc::new(TopicFilterResolver::default()))
    }

    #[test]
    fn test_msg_ids_start_at_one() {
        let session = session();
        assert_eq!(session.next_msg_id(), 1);
        assert_eq!(session.next_msg_id(), 2);
    }

    #[test]
    fn test_default_topics_before_profile() {
        let session = session();
        assert!(session.is_device_telemetry_topic("v1/devices/me/telemetry"));
        assert!(session.is_device_attributes_topic("v1/devices/me/attributes"));
        assert!(session.is_json_payload_type());
        assert!(session.profile_id().is_none());
    }

    #[test]
    fn test_profile_replaces_filters() {
        let session = session();
        let id = new_profile_id();
        session
            .set_device_profile(&mqtt_profile(id, "devices/+/telemetry"))
            .unwrap();

        assert!(session.is_device_telemetry_topic("devices/abc/telemetry"));
        assert!(!session.is_device_telemetry_topic("v1/devices/me/telemetry"));
        assert!(session.is_device_attributes_topic("devices/abc/attributes"));
        assert_eq!(session.profile_id(), Some(id));
        assert_eq!(session.config().profile_id, Some(id));
    }

    #[test]
    fn test_concurrent_profiles_never_mix() {
        let session = session();
        let profiles: Vec<_> = (0..4)
            .map(|i| {
                let topic = format!("p{i}/telemetry");
                (mqtt_profile(new_profile_id(), &topic), topic)
            })
            .collect();
        let all = &profiles;

        std::thread::scope(|scope| {
            for (profile, _) in all {
                let session = &session;
                scope.spawn(move || {
                    for _ in 0..200 {
                        session.set_device_profile(profile).unwrap();
                        let config = session.config();
                        let (_, topic) = all
                            .iter()
                            .find(|(p, _)| Some(p.id) == config.profile_id)
                            .unwrap();
                        assert!(config.filters.telemetry.matches(topic));
                    }
                });
            }
        });
    }

    #[test]
    fn test_update_for_other_profile_ignored() {
        let session = session();
        let id = new_profile_id();
        session.set_device_profile(&mqtt_profile(id, "a/telemetry")).unwrap();

        let applied = session
            .on_device_profile_update(&mqtt_profile(new_profile_id(), "b/telemetry"))
            .unwrap();

        assert!(!applied);
        assert!(session.is_device_telemetry_topic("a/telemetry"));
    }

    #[test]
    fn test_provision_flags() {
        let session = session();
        assert!(!session.provision_only());
        session.set_provision_only(true);
        session.set_provision_payload_type(TransportPayloadType::Protobuf);
        assert!(session.provision_only());
        assert_eq!(session.provision_payload_type(), TransportPayloadType::Protobuf);
    }
}
