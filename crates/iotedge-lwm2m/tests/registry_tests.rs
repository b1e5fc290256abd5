//! Session registry behaviour: resolution, re-keying, teardown and profiles

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::sync::atomic::Ordering;

use common::*;
use iotedge_core::ErrorKind;
use iotedge_lwm2m::{
    ProfileCompiler, Registration, RegistryError, RejectReason, SecurityMode, SessionState,
    ValidationResult,
};
use pretty_assertions::assert_eq;

#[test]
fn test_no_sec_session_keyed_by_identity() {
    let profile = lwm2m_profile(profile_id(), &["/3/0/9"]);
    let (registry, _) = registry(
        TableValidator::default().with("dev-1", no_sec(profile.clone())),
        Arc::new(RecordingStore::default()),
    );

    let resolution = registry.resolve_or_create_session("dev-1");

    assert!(resolution.is_validated());
    assert!(resolution.security_info().is_none());
    assert!(registry.contains_key("dev-1"));
    let session = resolution.session().unwrap();
    assert_eq!(session.endpoint(), "dev-1");
    assert_eq!(session.profile_id(), profile.id);
    assert_eq!(session.state(), SessionState::Unbound);
    assert!(registry.profile(profile.id).unwrap().is_observed("/3/0/9"));
}

#[test]
fn test_missing_profile_rejected_with_placeholder() {
    let (registry, _) = registry(
        TableValidator::default().with(
            "dev-2",
            ValidationResult {
                security_mode: SecurityMode::Psk,
                security_info: Some(iotedge_lwm2m::SecurityInfo::pre_shared_key(
                    "dev-2",
                    "dev-2",
                    vec![1],
                )),
                device_profile: None,
                device: None,
            },
        ),
        Arc::new(RecordingStore::default()),
    );

    let resolution = registry.resolve_or_create_session("dev-2");

    assert!(!resolution.is_validated());
    assert_eq!(resolution.reject_reason(), Some(RejectReason::ProfileMissing));
    let placeholder = resolution.security_info().unwrap();
    assert_eq!(placeholder.endpoint, "error");
    assert_eq!(placeholder.identity(), Some("error_identity"));
    assert!(registry.is_empty());
}

#[test]
fn test_validator_refusal_rejected_with_placeholder() {
    let (registry, _) = registry(
        TableValidator::default(),
        Arc::new(RecordingStore::default()),
    );

    let resolution = registry.resolve_or_create_session("stranger");

    assert_eq!(
        resolution.reject_reason(),
        Some(RejectReason::ValidatorRefused)
    );
    assert!(resolution.security_info().is_some());
    assert!(registry.is_empty());
}

#[test]
fn test_uncompilable_profile_rejected() {
    let profile = bare_profile(profile_id());
    let (registry, _) = registry(
        TableValidator::default().with("dev-4", no_sec(profile.clone())),
        Arc::new(RecordingStore::default()),
    );

    let resolution = registry.resolve_or_create_session("dev-4");

    assert_eq!(
        resolution.reject_reason(),
        Some(RejectReason::ProfileNotCompilable(profile.id))
    );
    assert!(registry.is_empty());
}

#[test]
fn test_psk_without_descriptor_rejected() {
    let mut result = psk("dev-5", "id-5", lwm2m_profile(profile_id(), &[]));
    result.security_info = None;
    let (registry, _) = registry(
        TableValidator::default().with("id-5", result),
        Arc::new(RecordingStore::default()),
    );

    let resolution = registry.resolve_or_create_session("id-5");

    assert_eq!(
        resolution.reject_reason(),
        Some(RejectReason::SecurityInfoMissing(SecurityMode::Psk))
    );
    assert!(registry.is_empty());
}

#[test]
fn test_psk_session_keyed_by_descriptor_endpoint() {
    let (registry, validator) = registry(
        TableValidator::default().with(
            "psk-id",
            psk("dev-6", "psk-id", lwm2m_profile(profile_id(), &[])),
        ),
        Arc::new(RecordingStore::default()),
    );

    let first = registry.resolve_or_create_session("psk-id");
    let again = registry.resolve_or_create_session("psk-id");

    assert!(registry.contains_key("dev-6"));
    assert!(!registry.contains_key("psk-id"));
    assert_eq!(first.security_info().unwrap().endpoint, "dev-6");
    assert!(Arc::ptr_eq(first.session().unwrap(), again.session().unwrap()));
    assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        registry
            .lookup_by_endpoint_or_identity(None, "psk-id")
            .map(|s| s.endpoint().to_string()),
        Some("dev-6".to_string())
    );
}

#[test]
fn test_promote_rekeys_to_registration_id() {
    let (registry, _) = registry(
        TableValidator::default().with("dev-3", no_sec(lwm2m_profile(profile_id(), &[]))),
        Arc::new(RecordingStore::default()),
    );
    let session = registry
        .resolve_or_create_session("dev-3")
        .session()
        .cloned()
        .unwrap();

    let registration = Registration::new("R100", "dev-3");
    let promoted = registry.promote_to_registration(&registration).unwrap();

    assert!(Arc::ptr_eq(&session, &promoted));
    assert_eq!(promoted.state(), SessionState::Bound);
    assert!(!registry.contains_key("dev-3"));
    assert_eq!(registry.session_keys(session.session_id()), vec!["R100".to_string()]);

    let again = registry.promote_to_registration(&registration).unwrap();
    assert!(Arc::ptr_eq(&session, &again));
    assert_eq!(registry.session_keys(session.session_id()), vec!["R100".to_string()]);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_promote_creates_session_on_first_handshake() {
    let (registry, _) = registry(
        TableValidator::default().with("dev-7", no_sec(lwm2m_profile(profile_id(), &[]))),
        Arc::new(RecordingStore::default()),
    );

    let session = registry
        .promote_to_registration(&Registration::new("R7", "dev-7"))
        .unwrap();

    assert_eq!(session.registration_id().as_deref(), Some("R7"));
    assert_eq!(registry.registration("R7").unwrap().endpoint, "dev-7");
}

#[test]
fn test_promote_rejected_endpoint() {
    let (registry, _) = registry(
        TableValidator::default(),
        Arc::new(RecordingStore::default()),
    );

    let err = registry
        .promote_to_registration(&Registration::new("R8", "dev-8"))
        .unwrap_err();

    assert_eq!(
        err,
        RegistryError::CredentialRejected {
            endpoint: "dev-8".to_string(),
            reason: RejectReason::ValidatorRefused,
        }
    );
    let boxed: Box<iotedge_core::Error> = err.into();
    assert_eq!(boxed.kind, ErrorKind::CredentialRejected);
    assert!(registry.is_empty());
}

#[test]
fn test_reregistration_moves_to_new_id() {
    let (registry, _) = registry(
        TableValidator::default().with("dev-9", no_sec(lwm2m_profile(profile_id(), &[]))),
        Arc::new(RecordingStore::default()),
    );
    let first = registry
        .promote_to_registration(&Registration::new("R1", "dev-9"))
        .unwrap();

    let second = registry
        .promote_to_registration(&Registration::new("R2", "dev-9"))
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.session_keys(first.session_id()), vec!["R2".to_string()]);
}

#[test]
fn test_all_identifiers_resolve_bound_session() {
    let (registry, _) = registry(
        TableValidator::default().with("dev-10", no_sec(lwm2m_profile(profile_id(), &[]))),
        Arc::new(RecordingStore::default()),
    );
    let registration = Registration::new("R10", "dev-10");
    let session = registry.promote_to_registration(&registration).unwrap();

    let by_reg = registry.lookup_by_registration_id("R10").unwrap();
    let by_uuid = registry.lookup_by_session_uuid(session.session_id()).unwrap();
    let by_info = registry
        .lookup_by_session_info(&session.session_id().to_session_info())
        .unwrap();
    let by_endpoint = registry
        .lookup_by_endpoint_or_identity(Some("dev-10"), "dev-10")
        .unwrap();
    let by_registration = registry.lookup_with_registration(&registration, None).unwrap();

    for found in [by_reg, by_uuid, by_info, by_endpoint, by_registration] {
        assert!(Arc::ptr_eq(&session, &found));
    }
    assert!(registry.lookup_with_registration(&registration, Some("R-other")).is_none());
}

#[test]
fn test_lookup_by_unknown_uuid_fails() {
    let (registry, _) = registry(
        TableValidator::default(),
        Arc::new(RecordingStore::default()),
    );

    let err = registry
        .lookup_by_session_uuid(iotedge_core::SessionId::random())
        .unwrap_err();

    assert!(matches!(err, RegistryError::SessionNotFound { .. }));
}

#[test]
fn test_teardown_is_idempotent() {
    let store = Arc::new(RecordingStore::default());
    let (registry, _) = registry(
        TableValidator::default().with("dev-11", no_sec(lwm2m_profile(profile_id(), &[]))),
        Arc::clone(&store),
    );
    let session = registry
        .promote_to_registration(&Registration::new("R11", "dev-11"))
        .unwrap();

    let removed = registry.teardown_session("R11");
    assert!(removed.is_some());
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(registry.is_empty());

    assert!(registry.teardown_session("R11").is_none());
    assert!(registry.is_empty());
    assert_eq!(*store.removed.lock(), vec![("dev-11".to_string(), false)]);
}

#[test]
fn test_teardown_survives_store_failure() {
    let store = Arc::new(RecordingStore::failing());
    let (registry, _) = registry(
        TableValidator::default().with(
            "dev-12",
            psk("dev-12", "id-12", lwm2m_profile(profile_id(), &[])),
        ),
        Arc::clone(&store),
    );
    registry
        .promote_to_registration(&Registration::new("R12", "dev-12"))
        .unwrap();

    assert!(registry.teardown_session("R12").is_some());
    assert!(registry.lookup_by_registration_id("R12").is_none());
    assert_eq!(store.removed.lock().len(), 1);
}

#[test]
fn test_bind_profile_failure_keeps_previous() {
    let id = profile_id();
    let (registry, _) = registry(
        TableValidator::default(),
        Arc::new(RecordingStore::default()),
    );

    assert!(registry.bind_profile(&lwm2m_profile(id, &["/3/0/9"])));
    let before = registry.profile(id).unwrap();

    assert!(!registry.bind_profile(&bare_profile(id)));
    let after = registry.profile(id).unwrap();
    assert!(Arc::ptr_eq(&before, &after));

    assert!(registry.bind_profile(&lwm2m_profile(id, &["/5/0/3"])));
    let replaced = registry.profile(id).unwrap();
    assert!(replaced.is_observed("/5/0/3"));
    assert!(!replaced.is_observed("/3/0/9"));
    assert!(before.is_observed("/3/0/9"));
}

#[test]
fn test_profile_for_registration_and_replace() {
    let profile = lwm2m_profile(profile_id(), &["/3/0/9"]);
    let (registry, _) = registry(
        TableValidator::default().with("dev-13", no_sec(profile.clone())),
        Arc::new(RecordingStore::default()),
    );
    registry
        .promote_to_registration(&Registration::new("R13", "dev-13"))
        .unwrap();

    assert_eq!(
        registry.profile_for_registration("R13").map(|p| p.profile_id()),
        Some(profile.id)
    );

    let other = lwm2m_profile(profile_id(), &[]);
    let mut next = HashMap::new();
    next.insert(other.id, Arc::new(ProfileCompiler::compile(&other).unwrap()));
    let previous = registry.replace_profiles(next);

    assert!(previous.contains_key(&profile.id));
    assert!(registry.profile(profile.id).is_none());
    assert_eq!(registry.profiles().len(), 1);
    assert!(registry.profile_for_registration("R13").is_none());
}

#[test]
fn test_concurrent_promotions_never_double_key() {
    let mut validator = TableValidator::default();
    for i in 0..32 {
        let endpoint = format!("node-{i}");
        validator = validator.with(&endpoint, no_sec(lwm2m_profile(profile_id(), &[])));
    }
    let (registry, _) = registry(validator, Arc::new(RecordingStore::default()));

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for i in 0..32 {
                    let registration = Registration::new(format!("R-{i}"), format!("node-{i}"));
                    assert!(registry.promote_to_registration(&registration).is_ok());
                }
            });
        }
    });

    assert_eq!(registry.len(), 32);
    for (key, session) in registry.sessions() {
        assert!(key.starts_with("R-"));
        assert_eq!(registry.session_keys(session.session_id()), vec![key]);
    }
}

#[test]
fn test_racing_registration_ids_leave_one_consistent_key() {
    const PROMOTERS: usize = 8;

    for _ in 0..200 {
        let (registry, _) = registry(
            TableValidator::default().with("dev", no_sec(lwm2m_profile(profile_id(), &[]))),
            Arc::new(RecordingStore::default()),
        );
        let session = registry
            .resolve_or_create_session("dev")
            .session()
            .cloned()
            .unwrap();
        let barrier = Barrier::new(PROMOTERS);

        std::thread::scope(|scope| {
            for i in 1..=PROMOTERS {
                let (registry, barrier, session) = (&registry, &barrier, &session);
                scope.spawn(move || {
                    let registration = Registration::new(format!("R{i}"), "dev");
                    barrier.wait();
                    let promoted = registry.promote_to_registration(&registration).unwrap();
                    assert!(Arc::ptr_eq(&promoted, session));
                });
            }
        });

        let bound = session.registration_id().unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.session_keys(session.session_id()), vec![bound.clone()]);
        assert!(registry.lookup_by_registration_id(&bound).is_some());

        let again = registry
            .promote_to_registration(&Registration::new(bound.clone(), "dev"))
            .unwrap();
        assert!(Arc::ptr_eq(&again, &session));
        assert_eq!(registry.session_keys(session.session_id()), vec![bound]);
    }
}
