//! End-to-end session life-cycle tests against the in-memory event store.
//!
//! These cover the core scenarios: create-with-password, WebAuthn
//! challenge and verification, token rotation, terminate idempotence,
//! check ordering, and the conflict retry path.

#![allow(clippy::unwrap_used)] // Test code
#![allow(clippy::expect_used)] // Test code

use portcullis_core::aggregate::{Aggregate, AggregateId, Sequence};
use portcullis_core::clock::SystemClock;
use portcullis_core::event::{PendingEvent, StoredEvent};
use portcullis_core::event_store::{EventFilter, EventStore, EventStoreError};
use portcullis_session::commands::{
    Checks, Commands, IntentCheck, RequestChallenges, RequestContext, WebAuthnChallengeRequest,
};
use portcullis_session::config::SessionConfig;
use portcullis_session::error::ErrorKind;
use portcullis_session::mocks::{
    MockAssertion, MockRateLimiter, MockUser, MockUserDirectory, MockWebAuthnProvider,
};
use portcullis_session::providers::{Argon2PasswordHasher, PasswordHasher as _};
use portcullis_session::state::{Metadata, SessionState, UserSelector, UserVerificationRequirement};
use portcullis_session::token::EncryptionKey;
use portcullis_session::write_model::SessionWriteModel;
use portcullis_testing::InMemoryEventStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type TestCommands =
    Commands<MockUserDirectory, MockWebAuthnProvider, Argon2PasswordHasher, MockRateLimiter>;

struct Harness {
    store: Arc<InMemoryEventStore>,
    commands: TestCommands,
}

fn directory() -> MockUserDirectory {
    let hash = Argon2PasswordHasher::new().hash("hunter2").unwrap();
    MockUserDirectory::new()
        .with_user(MockUser {
            user_id: "user-alice".into(),
            login_name: "alice".into(),
            display_name: "Alice".into(),
            resource_owner: "org-1".into(),
            password_hash: Some(hash),
        })
        .with_user(MockUser {
            user_id: "user-bob".into(),
            login_name: "bob".into(),
            display_name: "Bob".into(),
            resource_owner: "org-1".into(),
            password_hash: None,
        })
}

fn harness_with(config: SessionConfig, rate_limiter: MockRateLimiter) -> Harness {
    let store = Arc::new(InMemoryEventStore::new());
    let commands = Commands::start(
        store.clone(),
        Arc::new(portcullis_testing::SequentialIdGenerator::new("session")),
        Arc::new(SystemClock::new()),
        directory(),
        MockWebAuthnProvider::new(),
        Argon2PasswordHasher::new(),
        rate_limiter,
        &EncryptionKey::generate(),
        config,
    )
    .unwrap();
    Harness { store, commands }
}

fn harness() -> Harness {
    harness_with(SessionConfig::new("login.example.com"), MockRateLimiter::new())
}

fn ctx() -> RequestContext {
    RequestContext {
        instance_id: "inst-1".into(),
        caller_user_id: "service-account".into(),
        resource_owner: "org-1".into(),
    }
}

fn alice_check() -> Checks {
    Checks {
        user: Some(UserSelector::ByLoginName("alice".into())),
        ..Checks::default()
    }
}

async fn reduce_model(harness: &Harness, session_id: &str) -> SessionWriteModel {
    let events = harness
        .store
        .filter(
            EventFilter::new("inst-1", "session").aggregate_id(AggregateId::new(session_id)),
        )
        .await
        .unwrap();
    let mut model = SessionWriteModel::new(session_id);
    model.append_and_reduce(&events).unwrap();
    model
}

// S1: create with user + password + metadata.
#[tokio::test]
async fn create_with_password_records_both_factors() {
    let harness = harness();
    let mut metadata = Metadata::new();
    metadata.insert("ip".into(), b"1.2.3.4".to_vec());

    let checks = Checks {
        user: Some(UserSelector::ByLoginName("alice".into())),
        password: Some("hunter2".into()),
        ..Checks::default()
    };
    let created = harness
        .commands
        .create_session(&ctx(), checks, metadata, None)
        .await
        .unwrap();

    assert_eq!(
        harness
            .store
            .event_types_for(&AggregateId::new(&created.session_id)),
        vec![
            "session.added",
            "session.user.checked",
            "session.password.checked",
            "session.metadata.set",
            "session.token.set",
        ]
    );
    assert_eq!(created.details.sequence, 5);
    assert_eq!(created.details.resource_owner, "org-1");
    assert!(!created.session_token.is_empty());

    let model = reduce_model(&harness, &created.session_id).await;
    assert_eq!(model.user_factor.unwrap().login_name, "alice");
    assert!(model.password_factor.is_some());
    assert_eq!(model.metadata.get("ip").unwrap(), b"1.2.3.4");
}

#[tokio::test]
async fn wrong_password_appends_nothing() {
    let harness = harness();
    let checks = Checks {
        user: Some(UserSelector::ByLoginName("alice".into())),
        password: Some("wrong".into()),
        ..Checks::default()
    };

    let err = harness
        .commands
        .create_session(&ctx(), checks, Metadata::new(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    assert!(harness.store.is_empty());
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let harness = harness();
    let checks = Checks {
        user: Some(UserSelector::ByLoginName("mallory".into())),
        ..Checks::default()
    };

    let err = harness
        .commands
        .create_session(&ctx(), checks, Metadata::new(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(harness.store.is_empty());
}

// Canonical ordering: a password check cannot run before a user check.
#[tokio::test]
async fn password_without_user_is_failed_precondition() {
    let harness = harness();
    let checks = Checks {
        password: Some("hunter2".into()),
        ..Checks::default()
    };

    let err = harness
        .commands
        .create_session(&ctx(), checks, Metadata::new(), None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert!(harness.store.is_empty());
}

// S2: challenge, then verify with UV=true.
#[tokio::test]
async fn webauthn_challenge_then_verify() {
    let harness = harness();
    let challenges = RequestChallenges {
        webauthn: Some(WebAuthnChallengeRequest {
            user_verification: UserVerificationRequirement::Required,
            domain: "example.com".into(),
        }),
    };

    let created = harness
        .commands
        .create_session(&ctx(), alice_check(), Metadata::new(), Some(challenges))
        .await
        .unwrap();
    let options = created.challenges.webauthn.expect("challenge material");
    assert_eq!(options["publicKey"]["rpId"], "example.com");

    let updated = harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            Checks {
                webauthn: Some(MockAssertion::verified(true).to_bytes()),
                ..Checks::default()
            },
            Metadata::new(),
            None,
        )
        .await
        .unwrap();
    assert_ne!(updated.session_token, created.session_token);

    let model = reduce_model(&harness, &created.session_id).await;
    let factor = model.webauthn_factor.expect("webauthn factor");
    assert!(factor.user_verified);
    assert!(model.pending_challenge.is_none(), "challenge is single-use");
}

// S3: required user verification not met.
#[tokio::test]
async fn webauthn_required_uv_not_met() {
    let harness = harness();
    let challenges = RequestChallenges {
        webauthn: Some(WebAuthnChallengeRequest {
            user_verification: UserVerificationRequirement::Required,
            domain: "example.com".into(),
        }),
    };

    let created = harness
        .commands
        .create_session(&ctx(), alice_check(), Metadata::new(), Some(challenges))
        .await
        .unwrap();
    let before = harness
        .store
        .event_types_for(&AggregateId::new(&created.session_id));

    let err = harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            Checks {
                webauthn: Some(MockAssertion::verified(false).to_bytes()),
                ..Checks::default()
            },
            Metadata::new(),
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    assert_eq!(
        harness
            .store
            .event_types_for(&AggregateId::new(&created.session_id)),
        before,
        "failed batch must append nothing"
    );
}

#[tokio::test]
async fn discouraged_uv_is_not_recorded() {
    let harness = harness();
    let challenges = RequestChallenges {
        webauthn: Some(WebAuthnChallengeRequest {
            user_verification: UserVerificationRequirement::Discouraged,
            domain: String::new(), // falls back to the external domain
        }),
    };

    let created = harness
        .commands
        .create_session(&ctx(), alice_check(), Metadata::new(), Some(challenges))
        .await
        .unwrap();
    let options = created.challenges.webauthn.expect("challenge material");
    assert_eq!(options["publicKey"]["rpId"], "login.example.com");

    harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            Checks {
                webauthn: Some(MockAssertion::verified(true).to_bytes()),
                ..Checks::default()
            },
            Metadata::new(),
            None,
        )
        .await
        .unwrap();

    let model = reduce_model(&harness, &created.session_id).await;
    assert!(!model.webauthn_factor.unwrap().user_verified);
}

#[tokio::test]
async fn webauthn_without_challenge_is_failed_precondition() {
    let harness = harness();
    let created = harness
        .commands
        .create_session(&ctx(), alice_check(), Metadata::new(), None)
        .await
        .unwrap();

    let err = harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            Checks {
                webauthn: Some(MockAssertion::verified(true).to_bytes()),
                ..Checks::default()
            },
            Metadata::new(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

// S4: token rotation invalidates the previous token.
#[tokio::test]
async fn token_rotation_invalidates_old_token() {
    let harness = harness();
    let created = harness
        .commands
        .create_session(&ctx(), Checks::default(), Metadata::new(), None)
        .await
        .unwrap();

    let updated = harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            alice_check(),
            Metadata::new(),
            None,
        )
        .await
        .unwrap();
    assert_ne!(updated.session_token, created.session_token);

    let err = harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            alice_check(),
            Metadata::new(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn empty_update_retains_token_and_appends_nothing() {
    let harness = harness();
    let created = harness
        .commands
        .create_session(&ctx(), Checks::default(), Metadata::new(), None)
        .await
        .unwrap();
    let before = harness.store.len();

    let updated = harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            Checks::default(),
            Metadata::new(),
            None,
        )
        .await
        .unwrap();

    assert_eq!(updated.session_token, created.session_token);
    assert_eq!(updated.details.sequence, created.details.sequence);
    assert_eq!(harness.store.len(), before);
}

// Metadata round-trip: set then delete leaves the key absent.
#[tokio::test]
async fn metadata_delete_by_empty_value() {
    let harness = harness();
    let mut set = Metadata::new();
    set.insert("k".into(), b"v".to_vec());
    let created = harness
        .commands
        .create_session(&ctx(), Checks::default(), set, None)
        .await
        .unwrap();

    let mut unset = Metadata::new();
    unset.insert("k".into(), Vec::new());
    harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            Checks::default(),
            unset,
            None,
        )
        .await
        .unwrap();

    let model = reduce_model(&harness, &created.session_id).await;
    assert!(model.metadata.get("k").is_none());
}

// S6: terminate is idempotent.
#[tokio::test]
async fn terminate_is_idempotent() {
    let harness = harness();
    let created = harness
        .commands
        .create_session(&ctx(), Checks::default(), Metadata::new(), None)
        .await
        .unwrap();

    let first = harness
        .commands
        .terminate_session(&ctx(), &created.session_id, Some(&created.session_token))
        .await
        .unwrap();
    let events_after_first = harness.store.len();

    // Second terminate: creator authorization, no token, no new events.
    let second = harness
        .commands
        .terminate_session(&ctx(), &created.session_id, None)
        .await
        .unwrap();

    assert_eq!(first.sequence, second.sequence);
    assert_eq!(harness.store.len(), events_after_first);

    let model = reduce_model(&harness, &created.session_id).await;
    assert_eq!(model.state, SessionState::Terminated);
}

#[tokio::test]
async fn terminate_requires_creator_or_token() {
    let harness = harness();
    let created = harness
        .commands
        .create_session(&ctx(), Checks::default(), Metadata::new(), None)
        .await
        .unwrap();

    let mut foreign = ctx();
    foreign.caller_user_id = "someone-else".into();
    let err = harness
        .commands
        .terminate_session(&foreign, &created.session_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn terminated_session_rejects_updates() {
    let harness = harness();
    let created = harness
        .commands
        .create_session(&ctx(), Checks::default(), Metadata::new(), None)
        .await
        .unwrap();
    harness
        .commands
        .terminate_session(&ctx(), &created.session_id, Some(&created.session_token))
        .await
        .unwrap();

    let err = harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            alice_check(),
            Metadata::new(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let harness = harness();
    let err = harness
        .commands
        .update_session(
            &ctx(),
            "session-404",
            "irrelevant",
            Checks::default(),
            Metadata::new(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn user_factor_cannot_switch_users() {
    let harness = harness();
    let created = harness
        .commands
        .create_session(&ctx(), alice_check(), Metadata::new(), None)
        .await
        .unwrap();

    let err = harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            Checks {
                user: Some(UserSelector::ByLoginName("bob".into())),
                ..Checks::default()
            },
            Metadata::new(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
}

#[tokio::test]
async fn intent_check_sets_intent_factor() {
    let harness = harness();
    let created = harness
        .commands
        .create_session(&ctx(), alice_check(), Metadata::new(), None)
        .await
        .unwrap();

    let token = harness
        .commands
        .intent_service()
        .issue("intent-1", "user-alice", chrono::Utc::now())
        .unwrap();

    harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            Checks {
                intent: Some(IntentCheck {
                    intent_id: "intent-1".into(),
                    token,
                }),
                ..Checks::default()
            },
            Metadata::new(),
            None,
        )
        .await
        .unwrap();

    let model = reduce_model(&harness, &created.session_id).await;
    assert!(model.intent_factor.is_some());
}

#[tokio::test]
async fn foreign_intent_token_is_unauthenticated() {
    let harness = harness();
    let created = harness
        .commands
        .create_session(&ctx(), alice_check(), Metadata::new(), None)
        .await
        .unwrap();

    // Issued for bob, checked against alice's session.
    let token = harness
        .commands
        .intent_service()
        .issue("intent-1", "user-bob", chrono::Utc::now())
        .unwrap();

    let err = harness
        .commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            Checks {
                intent: Some(IntentCheck {
                    intent_id: "intent-1".into(),
                    token,
                }),
                ..Checks::default()
            },
            Metadata::new(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[tokio::test]
async fn rate_limited_password_check_is_too_many_requests() {
    let limiter = MockRateLimiter::new();
    limiter.deny_all();
    let harness = harness_with(SessionConfig::new("login.example.com"), limiter);

    let err = harness
        .commands
        .create_session(
            &ctx(),
            Checks {
                user: Some(UserSelector::ByLoginName("alice".into())),
                password: Some("hunter2".into()),
                ..Checks::default()
            },
            Metadata::new(),
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TooManyRequests);
    assert!(harness.store.is_empty());
}

/// Event store wrapper that fails the first N pushes with a conflict.
struct ConflictingStore {
    inner: Arc<InMemoryEventStore>,
    conflicts: AtomicUsize,
}

impl EventStore for ConflictingStore {
    fn push(
        &self,
        aggregate: Aggregate,
        expected: Option<Sequence>,
        events: Vec<PendingEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(EventStoreError::Conflict {
                    aggregate_id: aggregate.id,
                    expected: expected.unwrap_or(Sequence::INITIAL),
                    actual: expected.unwrap_or(Sequence::INITIAL).next(),
                });
            }
            self.inner.push(aggregate, expected, events).await
        })
    }

    fn filter(
        &self,
        filter: EventFilter,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredEvent>, EventStoreError>> + Send + '_>> {
        self.inner.filter(filter)
    }
}

fn conflicting_harness(retries: u32) -> (Arc<ConflictingStore>, Arc<InMemoryEventStore>, TestCommands) {
    let inner = Arc::new(InMemoryEventStore::new());
    let store = Arc::new(ConflictingStore {
        inner: inner.clone(),
        conflicts: AtomicUsize::new(0),
    });
    let commands = Commands::start(
        store.clone(),
        Arc::new(portcullis_testing::SequentialIdGenerator::new("session")),
        Arc::new(SystemClock::new()),
        directory(),
        MockWebAuthnProvider::new(),
        Argon2PasswordHasher::new(),
        MockRateLimiter::new(),
        &EncryptionKey::generate(),
        SessionConfig::new("login.example.com")
            .with_conflict_retries(retries)
            .with_conflict_backoff(std::time::Duration::from_millis(1)),
    )
    .unwrap();
    (store, inner, commands)
}

// Optimistic race: the loser retries and succeeds within the budget…
#[tokio::test]
async fn conflicted_update_retries_and_succeeds() {
    let (store, inner, commands) = conflicting_harness(3);
    let created = commands
        .create_session(&ctx(), Checks::default(), Metadata::new(), None)
        .await
        .unwrap();

    // Two conflicts, three retries allowed: the update lands.
    store.conflicts.store(2, Ordering::SeqCst);
    let events_before = inner.len();

    let updated = commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            alice_check(),
            Metadata::new(),
            None,
        )
        .await
        .unwrap();

    assert!(inner.len() > events_before);
    assert_ne!(updated.session_token, created.session_token);
}

// …and surfaces Conflict once the budget is exhausted.
#[tokio::test]
async fn conflict_surfaces_after_retry_budget() {
    let (store, inner, commands) = conflicting_harness(1);
    let created = commands
        .create_session(&ctx(), Checks::default(), Metadata::new(), None)
        .await
        .unwrap();

    store.conflicts.store(usize::MAX, Ordering::SeqCst);
    let events_before = inner.len();

    let err = commands
        .update_session(
            &ctx(),
            &created.session_id,
            &created.session_token,
            alice_check(),
            Metadata::new(),
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(inner.len(), events_before, "loser commits nothing");
}
