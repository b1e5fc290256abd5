//! Topic filters and their resolution from device profiles.
//!
//! Literal filters compare by string equality. Filters carrying MQTT
//! wildcards (`+` for one level, `#` for the remaining levels) are compiled
//! once into an anchored regex.

use std::fmt;

use dashmap::DashMap;
use iotedge_core::config::{DEFAULT_ATTRIBUTES_TOPIC, DEFAULT_TELEMETRY_TOPIC};
use iotedge_core::{DeviceProfile, TransportConfiguration, TransportPayloadType};
use regex::Regex;

use crate::error::SchemaError;

/// Highest QoS level MQTT defines
pub const MAX_QOS: u8 = 2;

/// Compiled MQTT topic filter
#[derive(Clone)]
pub enum TopicFilter {
    /// Literal topic
    Exact(String),
    /// Filter with wildcards
    Wildcard {
        /// Filter as written
        filter: String,
        /// Anchored pattern equivalent to the filter
        pattern: Regex,
    },
}

impl TopicFilter {
    /// Compile `filter`
    pub fn parse(filter: &str) -> Result<Self, SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidTopicFilter {
            filter: filter.to_string(),
            reason: reason.to_string(),
        };

        if filter.is_empty() {
            return Err(invalid("filter is empty"));
        }
        if !filter.contains(['+', '#']) {
            return Ok(Self::Exact(filter.to_string()));
        }

        let levels: Vec<&str> = filter.split('/').collect();
        let mut pattern = String::from("^");
        for (i, level) in levels.iter().enumerate() {
            match *level {
                "#" => {
                    if i + 1 != levels.len() {
                        return Err(invalid("'#' must be the last level"));
                    }
                    pattern.push_str(if i == 0 { ".*" } else { "(?:/.*)?" });
                }
                "+" => {
                    if i > 0 {
                        pattern.push('/');
                    }
                    pattern.push_str("[^/]*");
                }
                literal if literal.contains(['+', '#']) => {
                    return Err(invalid("wildcards must occupy a whole level"));
                }
                literal => {
                    if i > 0 {
                        pattern.push('/');
                    }
                    pattern.push_str(&regex::escape(literal));
                }
            }
        }
        pattern.push('$');

        let pattern = Regex::new(&pattern).map_err(|err| invalid(&err.to_string()))?;
        Ok(Self::Wildcard {
            filter: filter.to_string(),
            pattern,
        })
    }

    /// Whether `topic` matches this filter
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(filter) => filter == topic,
            Self::Wildcard { pattern, .. } => pattern.is_match(topic),
        }
    }

    /// Filter as written
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(filter) | Self::Wildcard { filter, .. } => filter,
        }
    }

    /// Whether the filter carries wildcards
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard { .. })
    }
}

impl fmt::Debug for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(filter) => f.debug_tuple("Exact").field(filter).finish(),
            Self::Wildcard { filter, .. } => f.debug_tuple("Wildcard").field(filter).finish(),
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for TopicFilter {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for TopicFilter {}

/// Telemetry/attributes filter pair with the payload encoding they carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFilters {
    /// Filter for telemetry uploads
    pub telemetry: TopicFilter,
    /// Filter for attribute updates
    pub attributes: TopicFilter,
    /// Payload encoding of both
    pub payload_type: TransportPayloadType,
}

/// Derives topic filters from device profiles
#[derive(Debug, Clone)]
pub struct TopicFilterResolver {
    defaults: ResolvedFilters,
}

impl TopicFilterResolver {
    /// Resolver falling back to the given default topics
    pub fn new(telemetry: &str, attributes: &str) -> Result<Self, SchemaError> {
        Ok(Self {
            defaults: ResolvedFilters {
                telemetry: TopicFilter::parse(telemetry)?,
                attributes: TopicFilter::parse(attributes)?,
                payload_type: TransportPayloadType::Json,
            },
        })
    }

    /// Filters used when a profile has no MQTT section
    #[must_use]
    pub const fn defaults(&self) -> &ResolvedFilters {
        &self.defaults
    }

    /// Filters for `profile`, or the defaults when the profile's transport
    /// is not MQTT
    pub fn resolve(&self, profile: &DeviceProfile) -> Result<ResolvedFilters, SchemaError> {
        match profile.transport_configuration() {
            Some(TransportConfiguration::Mqtt(mqtt)) => Ok(ResolvedFilters {
                telemetry: TopicFilter::parse(&mqtt.device_telemetry_topic)?,
                attributes: TopicFilter::parse(&mqtt.device_attributes_topic)?,
                payload_type: mqtt.transport_payload_type_configuration.payload_type(),
            }),
            _ => Ok(self.defaults.clone()),
        }
    }
}

impl Default for TopicFilterResolver {
    fn default() -> Self {
        Self {
            defaults: ResolvedFilters {
                telemetry: TopicFilter::Exact(DEFAULT_TELEMETRY_TOPIC.to_string()),
                attributes: TopicFilter::Exact(DEFAULT_ATTRIBUTES_TOPIC.to_string()),
                payload_type: TransportPayloadType::Json,
            },
        }
    }
}

/// Topic subscriptions of one session with their granted QoS
#[derive(Debug, Default)]
pub struct QosSubscriptions {
    filters: DashMap<String, (TopicFilter, u8)>,
}

impl QosSubscriptions {
    /// Empty subscription set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `filter`, returning the granted QoS
    pub fn subscribe(&self, filter: &str, qos: u8) -> Result<u8, SchemaError> {
        let compiled = TopicFilter::parse(filter)?;
        let granted = qos.min(MAX_QOS);
        self.filters
            .insert(filter.to_string(), (compiled, granted));
        Ok(granted)
    }

    /// Drop the subscription to `filter`
    pub fn unsubscribe(&self, filter: &str) -> bool {
        self.filters.remove(filter).is_some()
    }

    /// Highest QoS among the filters matching `topic`
    #[must_use]
    pub fn qos_for_topic(&self, topic: &str) -> Option<u8> {
        self.filters
            .iter()
            .filter(|entry| entry.value().0.matches(topic))
            .map(|entry| entry.value().1)
            .max()
    }

    /// Number of subscriptions
    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether there are no subscriptions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
