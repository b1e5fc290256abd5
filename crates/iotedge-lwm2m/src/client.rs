//! LwM2M client session and the registration handle bound to it.

use std::sync::atomic::{AtomicBool, Ordering};

use iotedge_core::{ProfileId, SessionId, Timestamp};
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};

use crate::security::{DeviceInfo, SecurityInfo};

/// Registration handle produced by the transport once the LwM2M
/// registration handshake completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Registration id assigned by the transport
    pub id: String,
    /// Endpoint the device registered with
    pub endpoint: String,
    /// Registration lifetime in seconds
    pub lifetime_secs: u64,
    /// LwM2M version announced by the device
    pub lwm2m_version: String,
    /// Object links announced by the device (`</3/0>`, ...)
    pub object_links: Vec<String>,
    /// Time the registration was (re)issued
    pub registered_at: Timestamp,
}

impl Registration {
    /// New registration for `endpoint` with default lifetime and version
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            lifetime_secs: 86_400,
            lwm2m_version: "1.0".to_string(),
            object_links: Vec::new(),
            registered_at: Timestamp::now(),
        }
    }

    /// Set the announced object links
    #[must_use]
    pub fn with_object_links(mut self, links: Vec<String>) -> Self {
        self.object_links = links;
        self
    }

    /// Set the lifetime
    #[must_use]
    pub const fn with_lifetime(mut self, lifetime_secs: u64) -> Self {
        self.lifetime_secs = lifetime_secs;
        self
    }
}

/// Where a session sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Keyed by endpoint, no registration yet
    Unbound,
    /// Keyed by registration id
    Bound,
    /// Removed from the registry
    Terminated,
}

/// Live state of one LwM2M device
#[derive(Debug)]
pub struct Lwm2mClient {
    endpoint: String,
    identity: Option<String>,
    security_info: Option<SecurityInfo>,
    device: Option<DeviceInfo>,
    profile_id: ProfileId,
    session_id: SessionId,
    created_at: Timestamp,
    registration: RwLock<Option<Registration>>,
    rekey: Mutex<()>,
    terminated: AtomicBool,
}

impl Lwm2mClient {
    /// Create an unbound session
    pub fn new(
        endpoint: impl Into<String>,
        security_info: Option<SecurityInfo>,
        device: Option<DeviceInfo>,
        profile_id: ProfileId,
    ) -> Self {
        let identity = security_info
            .as_ref()
            .and_then(SecurityInfo::identity)
            .map(str::to_string);
        Self {
            endpoint: endpoint.into(),
            identity,
            security_info,
            device,
            profile_id,
            session_id: SessionId::random(),
            created_at: Timestamp::now(),
            registration: RwLock::new(None),
            rekey: Mutex::new(()),
            terminated: AtomicBool::new(false),
        }
    }

    /// Endpoint the device connected with
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Negotiated identity for PSK sessions
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Security descriptor, absent for `NoSec` sessions
    #[must_use]
    pub fn security_info(&self) -> Option<&SecurityInfo> {
        self.security_info.as_ref()
    }

    /// Device the session belongs to
    #[must_use]
    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    /// Profile compiled for this session
    #[must_use]
    pub const fn profile_id(&self) -> ProfileId {
        self.profile_id
    }

    /// Stable session id
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Creation time
    #[must_use]
    pub const fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Current registration handle
    #[must_use]
    pub fn registration(&self) -> Option<Registration> {
        self.registration.read().clone()
    }

    /// Registration id, when bound
    #[must_use]
    pub fn registration_id(&self) -> Option<String> {
        self.registration.read().as_ref().map(|r| r.id.clone())
    }

    /// Lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.terminated.load(Ordering::Acquire) {
            SessionState::Terminated
        } else if self.registration.read().is_some() {
            SessionState::Bound
        } else {
            SessionState::Unbound
        }
    }

    /// Attach `registration`, replacing any previous handle.
    ///
    /// Returns `false` once the session has been terminated.
    pub(crate) fn bind_registration(&self, registration: Registration) -> bool {
        let mut slot = self.registration.write();
        if self.terminated.load(Ordering::Acquire) {
            return false;
        }
        *slot = Some(registration);
        true
    }

    /// Held across binding a registration and moving the session to its key,
    /// so the stored key always matches the bound registration id.
    pub(crate) fn lock_rekey(&self) -> MutexGuard<'_, ()> {
        self.rekey.lock()
    }

    pub(crate) fn terminate(&self) {
        let _slot = self.registration.write();
        self.terminated.store(true, Ordering::Release);
    }
}
