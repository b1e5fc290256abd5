//! Session registry for LwM2M devices.
//!
//! The registry maps an endpoint (before registration) or a registration id
//! (after registration) to the device's [`Lwm2mClient`], and keeps the
//! compiled profile of every device profile it has seen.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use iotedge_core::config::Lwm2mTransportConfig;
//! use iotedge_lwm2m::{
//!     SecurityInfo, SecurityStore, SecurityStoreError, SecurityValidator, ServerRole,
//!     SessionRegistry, ValidationResult,
//! };
//!
//! struct RefuseAll;
//! impl SecurityValidator for RefuseAll {
//!     fn validate(&self, _identity: &str, _role: ServerRole) -> ValidationResult {
//!         ValidationResult::refused()
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
//! let registry = SessionRegistry::new(
//!     Arc::new(RefuseAll),
//!     Arc::new(NoStore),
//!     &Lwm2mTransportConfig::default(),
//! );
//! let resolution = registry.resolve_or_create_session("unknown");
//! assert!(!resolution.is_validated());
//! assert_eq!(resolution.security_info().map(|i| i.endpoint.as_str()), Some("error"));
//! assert!(registry.is_empty());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use iotedge_core::config::Lwm2mTransportConfig;
use iotedge_core::{DeviceProfile, ProfileId, SessionId, SessionInfo};
use tracing::{debug, error, info, warn};

use crate::client::{Lwm2mClient, Registration};
use crate::error::{RegistryError, RegistryResult};
use crate::profile::{Lwm2mClientProfile, ProfileCompiler};
use crate::security::{
    RejectReason, SecurityInfo, SecurityMode, SecurityResolution, SecurityStore,
    SecurityValidator, ServerRole,
};

/// Descriptors removed on teardown are never flagged as compromised here;
/// revocation policy belongs to the store's owner.
const INFOS_ARE_COMPROMISED: bool = false;

/// Compiled profiles keyed by profile id
pub type ProfileMap = HashMap<ProfileId, Arc<Lwm2mClientProfile>>;

/// Concurrent registry of live LwM2M sessions
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Lwm2mClient>>,
    profiles: ArcSwap<ProfileMap>,
    validator: Arc<dyn SecurityValidator>,
    security_store: Arc<dyn SecurityStore>,
    rejection: SecurityInfo,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("profiles", &self.profiles.load().len())
            .finish()
    }
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new(
        validator: Arc<dyn SecurityValidator>,
        security_store: Arc<dyn SecurityStore>,
        config: &Lwm2mTransportConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            profiles: ArcSwap::from_pointee(HashMap::new()),
            validator,
            security_store,
            rejection: SecurityInfo::rejection_placeholder(config),
        }
    }

    /// Find the session for `identity`, validating and creating it on first
    /// contact.
    ///
    /// A rejection never creates a session and always carries the placeholder
    /// descriptor, so the DTLS layer can forward it unconditionally.
    pub fn resolve_or_create_session(&self, identity: &str) -> SecurityResolution {
        if let Some(session) = self.lookup_by_endpoint_or_identity(None, identity) {
            return Self::validated(session);
        }

        let result = self.validator.validate(identity, ServerRole::Client);
        let profile_id = result.device_profile.as_ref().map(|p| p.id);

        if result.security_mode == SecurityMode::DefaultMode {
            return self.reject(identity, profile_id, RejectReason::ValidatorRefused);
        }
        let Some(profile) = result.device_profile.as_ref() else {
            return self.reject(identity, None, RejectReason::ProfileMissing);
        };
        if !self.bind_profile(profile) {
            return self.reject(
                identity,
                profile_id,
                RejectReason::ProfileNotCompilable(profile.id),
            );
        }

        let (key, security_info) = match result.security_info {
            Some(info) => (info.endpoint.clone(), Some(info)),
            None if result.security_mode == SecurityMode::NoSec => (identity.to_string(), None),
            None => {
                return self.reject(
                    identity,
                    profile_id,
                    RejectReason::SecurityInfoMissing(result.security_mode),
                );
            }
        };

        let session = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Lwm2mClient::new(
                    key.clone(),
                    security_info,
                    result.device,
                    profile.id,
                ))
            })
            .value()
            .clone();

        info!(
            endpoint = %key,
            mode = ?result.security_mode,
            profile_id = %profile.id,
            session_id = %session.session_id().0,
            "LwM2M session created"
        );
        Self::validated(session)
    }

    /// Bind `registration` to its endpoint's session and re-key the session
    /// from the endpoint to the registration id.
    ///
    /// Promoting an already bound registration re-binds the handle in place.
    /// Promotions of one session are serialized; while the key moves the
    /// session is briefly reachable under both keys, never under neither.
    pub fn promote_to_registration(
        &self,
        registration: &Registration,
    ) -> RegistryResult<Arc<Lwm2mClient>> {
        let session = match self.lookup_by_registration_id(&registration.id) {
            Some(bound) => bound,
            None => self.session_for_endpoint(&registration.endpoint)?,
        };

        self.rekey(&session, registration)?;
        Ok(session)
    }

    fn rekey(&self, session: &Arc<Lwm2mClient>, registration: &Registration) -> RegistryResult<()> {
        let _rekey = session.lock_rekey();

        // A session already bound under an older registration id moves from
        // that id; an unbound one moves from its endpoint.
        let current_key = session
            .registration_id()
            .unwrap_or_else(|| session.endpoint().to_string());

        if !session.bind_registration(registration.clone()) {
            return Err(RegistryError::session_not_found(current_key));
        }
        if current_key == registration.id {
            debug!(registration_id = %registration.id, "re-bound registration in place");
            return Ok(());
        }

        self.sessions.insert(registration.id.clone(), Arc::clone(session));
        if self
            .sessions
            .remove_if(&current_key, |_, stored| Arc::ptr_eq(stored, session))
            .is_none()
        {
            // Torn down while moving.
            self.sessions
                .remove_if(&registration.id, |_, stored| Arc::ptr_eq(stored, session));
            return Err(RegistryError::session_not_found(current_key));
        }

        info!(
            from = %current_key,
            registration_id = %registration.id,
            "session re-keyed to registration"
        );
        Ok(())
    }

    fn session_for_endpoint(&self, endpoint: &str) -> RegistryResult<Arc<Lwm2mClient>> {
        if let Some(session) = self.lookup_by_endpoint_or_identity(Some(endpoint), endpoint) {
            return Ok(session);
        }
        match self.resolve_or_create_session(endpoint) {
            SecurityResolution::Validated { session, .. } => Ok(session),
            SecurityResolution::Rejected { reason, .. } => Err(RegistryError::CredentialRejected {
                endpoint: endpoint.to_string(),
                reason,
            }),
        }
    }

    /// Session keyed by `registration_id`
    #[must_use]
    pub fn lookup_by_registration_id(&self, registration_id: &str) -> Option<Arc<Lwm2mClient>> {
        self.sessions
            .get(registration_id)
            .filter(|entry| entry.registration_id().as_deref() == Some(registration_id))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Session with the given stable id.
    ///
    /// Only valid for sessions that have passed credential resolution.
    pub fn lookup_by_session_uuid(&self, session_id: SessionId) -> RegistryResult<Arc<Lwm2mClient>> {
        self.sessions
            .iter()
            .find(|entry| entry.session_id() == session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::session_not_found(session_id.0.to_string()))
    }

    /// Session for the two-halves wire form of a session id
    pub fn lookup_by_session_info(&self, info: &SessionInfo) -> RegistryResult<Arc<Lwm2mClient>> {
        self.lookup_by_session_uuid(info.session_id())
    }

    /// Session by endpoint when one is given, otherwise by PSK identity or
    /// raw identity key
    #[must_use]
    pub fn lookup_by_endpoint_or_identity(
        &self,
        endpoint: Option<&str>,
        identity: &str,
    ) -> Option<Arc<Lwm2mClient>> {
        match endpoint {
            Some(endpoint) => {
                if let Some(entry) = self.sessions.get(endpoint) {
                    return Some(Arc::clone(entry.value()));
                }
                self.find(|client| client.endpoint() == endpoint)
            }
            None => {
                if let Some(entry) = self.sessions.get(identity) {
                    return Some(Arc::clone(entry.value()));
                }
                self.find(|client| client.identity() == Some(identity))
            }
        }
    }

    /// Session for `registration`: the explicit id first, then the
    /// registration's own id, then its endpoint
    #[must_use]
    pub fn lookup_with_registration(
        &self,
        registration: &Registration,
        registration_id: Option<&str>,
    ) -> Option<Arc<Lwm2mClient>> {
        if let Some(id) = registration_id {
            return self.sessions.get(id).map(|entry| Arc::clone(entry.value()));
        }
        self.sessions
            .get(&registration.id)
            .or_else(|| self.sessions.get(&registration.endpoint))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Remove the session under `key` and revoke its security-store entry.
    ///
    /// Unknown keys are a no-op. Store failures are logged; the registry
    /// entry is gone either way.
    pub fn teardown_session(&self, key: &str) -> Option<Arc<Lwm2mClient>> {
        let (_, client) = self.sessions.remove(key)?;
        client.terminate();

        let endpoint = client
            .security_info()
            .map_or_else(|| client.endpoint(), |info| info.endpoint.as_str());
        match self.security_store.remove(endpoint, INFOS_ARE_COMPROMISED) {
            Ok(removed) => debug!(
                endpoint,
                revoked = removed.is_some(),
                "security store entry removed"
            ),
            Err(err) => warn!(
                endpoint,
                error = %err,
                "failed to revoke security store entry, session removed anyway"
            ),
        }
        info!(key, endpoint = %client.endpoint(), "LwM2M session terminated");
        Some(client)
    }

    /// Compile `profile` and replace its entry.
    ///
    /// Returns `false` and keeps the previous entry when the profile carries
    /// no usable LwM2M configuration.
    pub fn bind_profile(&self, profile: &DeviceProfile) -> bool {
        let Some(compiled) = ProfileCompiler::compile(profile) else {
            debug!(profile_id = %profile.id, "profile not compilable, keeping previous");
            return false;
        };
        let compiled = Arc::new(compiled);
        self.profiles.rcu(|current| {
            let mut next = ProfileMap::clone(current);
            next.insert(profile.id, Arc::clone(&compiled));
            next
        });
        debug!(profile_id = %profile.id, name = %profile.name, "profile bound");
        true
    }

    /// Registration bound under `registration_id`
    #[must_use]
    pub fn registration(&self, registration_id: &str) -> Option<Registration> {
        self.lookup_by_registration_id(registration_id)
            .and_then(|client| client.registration())
    }

    /// Compiled profile for `profile_id`
    #[must_use]
    pub fn profile(&self, profile_id: ProfileId) -> Option<Arc<Lwm2mClientProfile>> {
        self.profiles.load().get(&profile_id).cloned()
    }

    /// Compiled profile of the session bound under `registration_id`
    #[must_use]
    pub fn profile_for_registration(&self, registration_id: &str) -> Option<Arc<Lwm2mClientProfile>> {
        let client = self.lookup_by_registration_id(registration_id)?;
        self.profile(client.profile_id())
    }

    /// Snapshot of every compiled profile
    #[must_use]
    pub fn profiles(&self) -> Arc<ProfileMap> {
        self.profiles.load_full()
    }

    /// Replace every compiled profile at once, returning the previous set
    pub fn replace_profiles(&self, profiles: ProfileMap) -> Arc<ProfileMap> {
        self.profiles.swap(Arc::new(profiles))
    }

    /// Snapshot of every `(key, session)` pair
    #[must_use]
    pub fn sessions(&self) -> Vec<(String, Arc<Lwm2mClient>)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Keys under which `session_id` is currently stored
    #[must_use]
    pub fn session_keys(&self, session_id: SessionId) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.session_id() == session_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Whether anything is stored under `key`
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn find(&self, predicate: impl Fn(&Lwm2mClient) -> bool) -> Option<Arc<Lwm2mClient>> {
        self.sessions
            .iter()
            .find(|entry| predicate(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
    }

    fn validated(session: Arc<Lwm2mClient>) -> SecurityResolution {
        SecurityResolution::Validated {
            security_info: session.security_info().cloned(),
            profile_id: session.profile_id(),
            session,
        }
    }

    fn reject(
        &self,
        endpoint: &str,
        profile_id: Option<ProfileId>,
        reason: RejectReason,
    ) -> SecurityResolution {
        error!(
            endpoint,
            profile_id = ?profile_id,
            reason = %reason,
            "LwM2M registration failed"
        );
        SecurityResolution::Rejected {
            reason,
            placeholder: self.rejection.clone(),
        }
    }
}
