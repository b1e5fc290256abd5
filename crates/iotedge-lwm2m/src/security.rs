//! Credential resolution seams and the outcome handed back to the transport.
//!
//! Both the validator and the security store live outside this crate; the
//! registry only talks to them through [`SecurityValidator`] and
//! [`SecurityStore`].

use std::fmt;

use iotedge_core::config::Lwm2mTransportConfig;
use iotedge_core::{DeviceProfile, ProfileId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SecurityStoreError;

/// Key bytes of the placeholder credential. No device holds this key.
const REJECTION_PSK: [u8; 2] = [0x0A, 0x0B];

/// Negotiated credential scheme, with the codes used on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityMode {
    /// Pre-shared key
    Psk,
    /// Raw public key
    Rpk,
    /// X.509 certificate
    X509,
    /// No security, keyed by raw identity
    NoSec,
    /// X.509 with enrollment over secure transport
    X509Est,
    /// Credentials held in an external cache
    Redis,
    /// Validation produced no usable mode
    DefaultMode,
}

impl SecurityMode {
    /// Numeric code of this mode
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Psk => 0,
            Self::Rpk => 1,
            Self::X509 => 2,
            Self::NoSec => 3,
            Self::X509Est => 4,
            Self::Redis => 7,
            Self::DefaultMode => 255,
        }
    }

    /// Mode for a numeric code, `DefaultMode` for unknown codes
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Psk,
            1 => Self::Rpk,
            2 => Self::X509,
            3 => Self::NoSec,
            4 => Self::X509Est,
            7 => Self::Redis,
            _ => Self::DefaultMode,
        }
    }
}

/// Server role a credential is validated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerRole {
    /// Bootstrap server
    Bootstrap,
    /// Regular LwM2M server
    Client,
}

/// Credential material of a [`SecurityInfo`]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Credential {
    /// Pre-shared key with its identity
    PreSharedKey {
        /// PSK identity
        identity: String,
        /// Key bytes
        key: Vec<u8>,
    },
    /// Raw public key (DER)
    RawPublicKey(Vec<u8>),
    /// Certificate-based, trust decided by the DTLS layer
    X509,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreSharedKey { identity, .. } => f
                .debug_struct("PreSharedKey")
                .field("identity", identity)
                .field("key", &"[REDACTED]")
                .finish(),
            Self::RawPublicKey(key) => f.debug_tuple("RawPublicKey").field(&key.len()).finish(),
            Self::X509 => f.write_str("X509"),
        }
    }
}

/// Security descriptor handed to the DTLS layer for one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityInfo {
    /// Endpoint the descriptor belongs to
    pub endpoint: String,
    /// Credential material
    pub credential: Credential,
}

impl SecurityInfo {
    /// Descriptor for a pre-shared key
    pub fn pre_shared_key(
        endpoint: impl Into<String>,
        identity: impl Into<String>,
        key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: Credential::PreSharedKey {
                identity: identity.into(),
                key: key.into(),
            },
        }
    }

    /// Descriptor for a raw public key
    pub fn raw_public_key(endpoint: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: Credential::RawPublicKey(key.into()),
        }
    }

    /// Descriptor for an X.509 client
    pub fn x509(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credential: Credential::X509,
        }
    }

    /// Syntactically valid descriptor no real device can match.
    ///
    /// Returned on every rejection so the handshake fails closed.
    #[must_use]
    pub fn rejection_placeholder(config: &Lwm2mTransportConfig) -> Self {
        Self::pre_shared_key(
            config.rejection_endpoint.clone(),
            config.rejection_identity.clone(),
            REJECTION_PSK.to_vec(),
        )
    }

    /// PSK identity, if this is a PSK descriptor
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        match &self.credential {
            Credential::PreSharedKey { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

/// Device identity attached to a successful validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device identifier
    pub device_id: Uuid,
    /// Device name
    pub device_name: String,
}

/// What the validator knows about an identity
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Mode negotiated for the identity
    pub security_mode: SecurityMode,
    /// Descriptor for full-credential modes
    pub security_info: Option<SecurityInfo>,
    /// Profile of the device, when it has one
    pub device_profile: Option<DeviceProfile>,
    /// Device the credentials belong to
    pub device: Option<DeviceInfo>,
}

impl ValidationResult {
    /// Result for an identity the validator refused
    #[must_use]
    pub const fn refused() -> Self {
        Self {
            security_mode: SecurityMode::DefaultMode,
            security_info: None,
            device_profile: None,
            device: None,
        }
    }
}

/// Validates device credentials against the persistence layer
pub trait SecurityValidator: Send + Sync {
    /// Validate `identity` for the given server role
    fn validate(&self, identity: &str, role: ServerRole) -> ValidationResult;
}

/// Security store used by the DTLS layer
pub trait SecurityStore: Send + Sync {
    /// Remove the descriptor of `endpoint`, returning it if one was stored
    fn remove(
        &self,
        endpoint: &str,
        infos_are_compromised: bool,
    ) -> Result<Option<SecurityInfo>, SecurityStoreError>;
}

/// Why an identity was refused a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The validator refused the identity
    ValidatorRefused,
    /// The device has no profile
    ProfileMissing,
    /// The device profile carries no LwM2M configuration
    ProfileNotCompilable(ProfileId),
    /// A full-credential mode came back without a descriptor
    SecurityInfoMissing(SecurityMode),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidatorRefused => write!(f, "credentials refused"),
            Self::ProfileMissing => write!(f, "device has no profile"),
            Self::ProfileNotCompilable(id) => write!(f, "profile {id} is not LwM2M-configurable"),
            Self::SecurityInfoMissing(mode) => {
                write!(f, "no security descriptor for mode {mode:?}")
            }
        }
    }
}

/// Outcome of resolving an identity to a session
#[derive(Debug, Clone)]
pub enum SecurityResolution {
    /// A session exists for the identity
    Validated {
        /// Session bound to the identity
        session: std::sync::Arc<crate::client::Lwm2mClient>,
        /// Descriptor to hand to the DTLS layer, absent for `NoSec`
        security_info: Option<SecurityInfo>,
        /// Profile the session uses
        profile_id: ProfileId,
    },
    /// No session was created
    Rejected {
        /// Why the identity was refused
        reason: RejectReason,
        /// Descriptor that will fail the handshake
        placeholder: SecurityInfo,
    },
}

impl SecurityResolution {
    /// Whether a session was created or found
    #[must_use]
    pub const fn is_validated(&self) -> bool {
        matches!(self, Self::Validated { .. })
    }

    /// Session, when validated
    #[must_use]
    pub fn session(&self) -> Option<&std::sync::Arc<crate::client::Lwm2mClient>> {
        match self {
            Self::Validated { session, .. } => Some(session),
            Self::Rejected { .. } => None,
        }
    }

    /// Descriptor to forward to the DTLS layer.
    ///
    /// Rejections always yield the placeholder; only a validated `NoSec`
    /// session yields `None`.
    #[must_use]
    pub fn security_info(&self) -> Option<&SecurityInfo> {
        match self {
            Self::Validated { security_info, .. } => security_info.as_ref(),
            Self::Rejected { placeholder, .. } => Some(placeholder),
        }
    }

    /// Rejection reason, when rejected
    #[must_use]
    pub const fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Validated { .. } => None,
            Self::Rejected { reason, .. } => Some(*reason),
        }
    }
}
