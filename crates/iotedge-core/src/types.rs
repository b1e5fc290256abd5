//! Identifiers shared by both transports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a live session.
///
/// Travels between services as two signed 64-bit halves (see [`SessionInfo`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

/// Wire form of a [`SessionId`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Most significant 64 bits
    pub session_id_msb: i64,
    /// Least significant 64 bits
    pub session_id_lsb: i64,
}

/// Identifier of a device profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileId(pub Uuid);

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Utc>);

impl SessionId {
    /// Generate a fresh random session id
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Rebuild a session id from its wire halves
    #[must_use]
    pub fn from_halves(msb: i64, lsb: i64) -> Self {
        Self(Uuid::from_u64_pair(msb as u64, lsb as u64))
    }

    /// Split into the signed halves used on the wire
    #[must_use]
    pub fn to_halves(self) -> (i64, i64) {
        let (msb, lsb) = self.0.as_u64_pair();
        (msb as i64, lsb as i64)
    }

    /// Wire form of this id
    #[must_use]
    pub fn to_session_info(self) -> SessionInfo {
        let (session_id_msb, session_id_lsb) = self.to_halves();
        SessionInfo {
            session_id_msb,
            session_id_lsb,
        }
    }
}

impl SessionInfo {
    /// Session id carried by this wire form
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        SessionId::from_halves(self.session_id_msb, self.session_id_lsb)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl ProfileId {
    /// Wrap a profile uuid
    #[must_use]
    pub const fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ProfileId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl Timestamp {
    /// Create a new timestamp with current time
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Get the inner `DateTime`
    #[must_use]
    pub const fn datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Get duration since this timestamp
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
