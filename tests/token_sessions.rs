mod common;

use std::sync::Arc;
use std::time::Duration;

use cached_auth::services::auth::{
    EvictionPolicy, IdentityState, LockMode, SessionErrorKind, SessionPolicy, ValidateOptions,
};
use cached_auth::services::cache::{CipherKey, MemoryBackend, ReadOptions, ValkeyClient};
use chrono::{Duration as TimeDelta, Utc};
use common::{ContendedBackend, CountingBackend, ScriptedAuthority, policy, sessions};
use serde_json::json;

fn plain() -> ValidateOptions {
    ValidateOptions::default()
}

fn refresh() -> ValidateOptions {
    ValidateOptions {
        refresh: true,
        integration_key: Some("integration".into()),
    }
}

#[tokio::test]
async fn alice_demo_keeps_two_newest_tokens() {
    let s = sessions(Arc::new(MemoryBackend::new()), None, policy(2));

    let first = s.create_token("alice", "demo", json!({"n": 1})).await.unwrap();
    let second = s.create_token("alice", "demo", json!({"n": 2})).await.unwrap();
    let third = s.create_token("alice", "demo", json!({"n": 3})).await.unwrap();
    assert_eq!(third.active_tokens, 2);

    let err = s.validate(&first.token, &plain()).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenNotValid);

    let ok = s.validate(&second.token, &plain()).await.unwrap();
    assert_eq!(ok.identity_id, "alice");
    assert_eq!(ok.namespace, "demo");
    assert_eq!(ok.active_tokens, 2);
    // Claims are per identity: the last writer's data.
    assert_eq!(ok.claims, json!({"n": 3}));
    s.validate(&third.token, &plain()).await.unwrap();
}

#[tokio::test]
async fn eviction_follows_insertion_order() {
    let s = sessions(Arc::new(MemoryBackend::new()), None, policy(3));
    let mut tokens = Vec::new();
    for i in 0..5 {
        tokens.push(s.create_token("bob", "demo", json!({"i": i})).await.unwrap().token);
    }

    let state: IdentityState = s
        .store()
        .get("demo_bob", &ReadOptions::new())
        .await
        .unwrap();
    let kept: Vec<&String> = state.tokens.keys().collect();
    assert_eq!(kept, tokens[2..].iter().collect::<Vec<_>>());
}

#[tokio::test]
async fn reject_policy_reports_max_tokens() {
    let s = sessions(
        Arc::new(MemoryBackend::new()),
        None,
        SessionPolicy {
            max_tokens: 1,
            eviction: EvictionPolicy::Reject,
            ..SessionPolicy::default()
        },
    );
    let first = s.create_token("alice", "demo", json!({})).await.unwrap();
    let err = s.create_token("alice", "demo", json!({})).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::MaxTokensReached);
    s.validate(&first.token, &plain()).await.unwrap();
}

#[tokio::test]
async fn malformed_tokens_never_touch_backend_or_authority() {
    let backend = Arc::new(CountingBackend::default());
    let authority = Arc::new(ScriptedAuthority::new());
    let s = sessions(backend.clone(), Some(authority.clone()), policy(10));

    for bad in ["", "garbage", "a__b", "a__b__c__d", "token__alice__demo__short"] {
        let err = s.validate(bad, &refresh()).await.unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::WrongTokenFormat, "{bad:?}");
        let err = s.revoke(bad, true).await.unwrap_err();
        assert_eq!(err.kind, SessionErrorKind::WrongTokenFormat);
    }
    assert_eq!(backend.calls(), 0);
    assert_eq!(authority.checks(), 0);
}

#[tokio::test]
async fn second_validation_is_served_from_cache() {
    let authority = Arc::new(ScriptedAuthority::new());
    let s = sessions(Arc::new(MemoryBackend::new()), Some(authority.clone()), policy(10));

    let a = s.validate("acme__bob__t1", &plain()).await.unwrap();
    let b = s.validate("acme__bob__t1", &plain()).await.unwrap();
    assert_eq!(authority.checks(), 1);
    assert_eq!(a.claims, b.claims);
    assert!(b.has_privilege("read"));
    assert!(b.has_license("erp"));

    // Explicit refresh always goes remote.
    s.validate("acme__bob__t1", &refresh()).await.unwrap();
    assert_eq!(authority.checks(), 2);
}

#[tokio::test]
async fn failed_check_of_unknown_token_stores_nothing() {
    let authority = Arc::new(ScriptedAuthority::new());
    authority.set_failing(true);
    let s = sessions(Arc::new(MemoryBackend::new()), Some(authority.clone()), policy(10));

    let err = s.validate("acme__bob__t1", &plain()).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenNotValid);
    assert!(
        s.store()
            .get::<IdentityState>("acme_bob", &ReadOptions::new())
            .await
            .is_none()
    );
}

#[tokio::test]
async fn errored_tokens_wait_for_refresh_or_clear() {
    let authority = Arc::new(ScriptedAuthority::new());
    let s = sessions(Arc::new(MemoryBackend::new()), Some(authority.clone()), policy(10));
    s.validate("acme__bob__t1", &plain()).await.unwrap();

    authority.set_failing(true);
    let err = s.validate("acme__bob__t1", &refresh()).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenNotValid);
    assert_eq!(authority.checks(), 2);

    // Still in error, and no silent remote retry even once the authority recovers.
    authority.set_failing(false);
    let err = s.validate("acme__bob__t1", &plain()).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenNotValid);
    assert!(err.messages.len() >= 2);
    assert_eq!(authority.checks(), 2);

    let state: IdentityState = s
        .store()
        .get("acme_bob", &ReadOptions::new())
        .await
        .unwrap();
    assert!(state.token("acme__bob__t1").unwrap().last_error.is_some());

    // Explicit refresh recovers.
    s.validate("acme__bob__t1", &refresh()).await.unwrap();
    assert_eq!(authority.checks(), 3);
    s.validate("acme__bob__t1", &plain()).await.unwrap();
    assert_eq!(authority.checks(), 3);
}

#[tokio::test]
async fn clear_token_error_restores_cached_session() {
    let authority = Arc::new(ScriptedAuthority::new());
    let s = sessions(Arc::new(MemoryBackend::new()), Some(authority.clone()), policy(10));
    s.validate("acme__bob__t1", &plain()).await.unwrap();
    authority.set_failing(true);
    s.validate("acme__bob__t1", &refresh()).await.unwrap_err();

    let cleared = s.clear_token_error("acme__bob__t1").await.unwrap();
    assert_eq!(cleared.identity_id, "bob");

    let again = s.validate("acme__bob__t1", &plain()).await.unwrap();
    assert!(again.has_privilege("read"));
    assert_eq!(authority.checks(), 2);

    let err = s.clear_token_error("acme__bob__unknown").await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenNotValid);
}

#[tokio::test]
async fn expired_tokens_are_swept() {
    let s = sessions(
        Arc::new(MemoryBackend::new()),
        None,
        SessionPolicy {
            expiration: Duration::ZERO,
            ..SessionPolicy::default()
        },
    );
    let session = s.create_token("alice", "demo", json!({})).await.unwrap();

    let err = s.validate(&session.token, &plain()).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenExpired);

    // Swept on the failed validation.
    let err = s.validate(&session.token, &plain()).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenNotValid);
}

#[tokio::test]
async fn revoke_one_or_all() {
    let s = sessions(Arc::new(MemoryBackend::new()), None, policy(10));
    let a = s.create_token("alice", "demo", json!({})).await.unwrap();
    let b = s.create_token("alice", "demo", json!({})).await.unwrap();
    let c = s.create_token("alice", "demo", json!({})).await.unwrap();

    s.revoke(&a.token, false).await.unwrap();
    assert!(s.validate(&a.token, &plain()).await.is_err());
    assert_eq!(s.validate(&b.token, &plain()).await.unwrap().active_tokens, 2);

    let err = s.revoke(&a.token, false).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenNotValid);

    s.revoke(&b.token, true).await.unwrap();
    assert!(s.validate(&c.token, &plain()).await.is_err());
    assert!(
        s.store()
            .get::<IdentityState>("demo_alice", &ReadOptions::new())
            .await
            .is_none()
    );
}

#[tokio::test]
async fn sign_in_keeps_the_issued_token() {
    let authority = Arc::new(ScriptedAuthority::new());
    let s = sessions(Arc::new(MemoryBackend::new()), Some(authority.clone()), policy(10));

    let err = s
        .sign_in("acme", "bob", "nope", Some("integration"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenNotValid);

    let session = s
        .sign_in("acme", "bob", "secret", Some("integration"))
        .await
        .unwrap();
    assert!(session.token.starts_with("acme__bob__"));
    assert_eq!(session.active_tokens, 1);

    s.validate(&session.token, &plain()).await.unwrap();
    assert_eq!(authority.checks(), 0);
    assert_eq!(authority.sign_ins(), 2);
}

#[tokio::test]
async fn wrong_cipher_is_a_security_error() {
    let backend = Arc::new(MemoryBackend::new());
    let with_key = |secret: &str| SessionPolicy {
        cipher: CipherKey::new(secret, "iv"),
        ..SessionPolicy::default()
    };

    let good = sessions(backend.clone(), None, with_key("k1"));
    let session = good.create_token("alice", "demo", json!({"x": 1})).await.unwrap();
    good.validate(&session.token, &plain()).await.unwrap();

    let bad = sessions(backend.clone(), None, with_key("k2"));
    let err = bad.validate(&session.token, &plain()).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::SecurityCipher);
    assert!(bad.store().security_alert());

    // The entry was dropped, so the right key no longer finds it either.
    let err = good.validate(&session.token, &plain()).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenNotValid);
}

#[tokio::test]
async fn identity_data_is_merged_into_claims() {
    let s = sessions(Arc::new(MemoryBackend::new()), None, policy(10));
    let mut session = s.create_token("alice", "demo", json!({"a": 1})).await.unwrap();

    assert!(s.add_identity_data(&mut session, "b", json!(2)).await.unwrap());
    let reread = s.validate(&session.token, &plain()).await.unwrap();
    assert_eq!(reread.claims, json!({"a": 1, "b": 2}));
}

#[tokio::test]
async fn disabled_cache_sends_every_check_to_the_authority() {
    let authority = Arc::new(ScriptedAuthority::new());
    let s = sessions(
        Arc::new(ValkeyClient::new(None, None)),
        Some(authority.clone()),
        SessionPolicy::default(),
    );

    let first = s.validate("acme__bob__t1", &plain()).await.unwrap();
    assert_eq!(first.identity_id, "bob");
    assert!(first.has_license("erp"));
    s.validate("acme__bob__t1", &plain()).await.unwrap();
    assert_eq!(authority.checks(), 2);

    let signed = s.sign_in("acme", "carol", "secret", None).await.unwrap();
    assert_eq!(signed.identity_id, "carol");
    assert_eq!(authority.sign_ins(), 1);
}

#[tokio::test]
async fn disabled_cache_issues_tokens_it_cannot_remember() {
    let s = sessions(
        Arc::new(ValkeyClient::new(None, None)),
        None,
        SessionPolicy::default(),
    );

    let created = s.create_token("alice", "demo", json!({"a": 1})).await.unwrap();
    assert_eq!(created.claims, json!({"a": 1}));

    let err = s.validate(&created.token, &plain()).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenNotValid);
}

#[tokio::test]
async fn optimistic_writer_gives_up_after_repeated_conflicts() {
    let backend = Arc::new(ContendedBackend::default());
    let s = sessions(
        backend.clone(),
        None,
        SessionPolicy {
            lock_mode: LockMode::Optimistic,
            ..SessionPolicy::default()
        },
    );

    let err = s.create_token("alice", "demo", json!({})).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::Backend);
    assert_eq!(backend.swaps(), 5);
}

#[tokio::test]
async fn authority_deadline_in_the_past_is_expired() {
    let backend = Arc::new(MemoryBackend::new());
    let authority = Arc::new(ScriptedAuthority::new());
    let s = sessions(backend, Some(authority.clone()), SessionPolicy::default());

    authority.set_expires_at(Some(Utc::now() - TimeDelta::days(1)));
    let err = s.validate("acme__bob__t1", &plain()).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenExpired);
    assert!(
        s.store()
            .get::<IdentityState>("acme_bob", &ReadOptions::new())
            .await
            .is_none()
    );

    // A known token refreshed into the past is dropped from the set.
    authority.set_expires_at(None);
    s.validate("acme__bob__t2", &plain()).await.unwrap();
    authority.set_expires_at(Some(Utc::now() - TimeDelta::seconds(1)));
    let err = s.validate("acme__bob__t2", &refresh()).await.unwrap_err();
    assert_eq!(err.kind, SessionErrorKind::TokenExpired);

    let state: IdentityState = s
        .store()
        .get("acme_bob", &ReadOptions::new())
        .await
        .unwrap();
    assert!(state.token("acme__bob__t2").is_none());
}
