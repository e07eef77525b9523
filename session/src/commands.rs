//! The session command engine.
//!
//! Accepts high-level session operations, materializes the write model by
//! replaying the session's events, validates and applies checks in
//! canonical order, signs a fresh bearer token on every mutation, and
//! appends the resulting events atomically.
//!
//! # Check ordering
//!
//! Checks within one request always run User → Password → Intent →
//! WebAuthn, with a challenge request last. The first failing check aborts
//! the whole batch: nothing is appended. Ordering is structural: the
//! [`Checks`] struct has one optional slot per factor and
//! [`Checks::into_commands`] emits them in canonical order, so a request
//! cannot reorder or repeat a check kind.
//!
//! # Concurrency
//!
//! Mutations are serialized per session by the event log's expected
//! sequence. A lost race surfaces as `Conflict` from the push; the engine
//! reloads and retries with exponential backoff up to the configured
//! budget before giving up.

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::{SESSION_AGGREGATE, SessionEvent, session_aggregate_type};
use crate::intent::IntentTokenService;
use crate::providers::{PasswordHasher, RateLimiter, UserDirectory, WebAuthnProvider};
use crate::state::{
    Metadata, ObjectDetails, ResolvedUser, SessionState, UserSelector,
    UserVerificationRequirement,
};
use crate::token::{EncryptionKey, SessionTokenService};
use crate::write_model::SessionWriteModel;
use portcullis_core::aggregate::{Aggregate, AggregateId, InstanceId, Sequence};
use portcullis_core::clock::Clock;
use portcullis_core::event::{PendingEvent, StoredEvent};
use portcullis_core::event_store::{EventFilter, EventStore};
use portcullis_core::id::IdGenerator;
use std::sync::Arc;

/// Identity and scope of the request being handled.
///
/// Filled by the transport layer from its authorization data.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Tenant the request acts on.
    pub instance_id: InstanceId,
    /// The calling user; recorded as event creator and used for
    /// creator-based authorization.
    pub caller_user_id: String,
    /// Organization that will own newly created sessions.
    pub resource_owner: String,
}

/// The factor checks of one request.
///
/// Each kind appears at most once; the struct shape enforces it.
#[derive(Debug, Clone, Default)]
pub struct Checks {
    /// Identify the user.
    pub user: Option<UserSelector>,
    /// Verify a password.
    pub password: Option<String>,
    /// Verify a federated IdP intent.
    pub intent: Option<IntentCheck>,
    /// Verify a WebAuthn assertion.
    pub webauthn: Option<Vec<u8>>,
}

/// An IdP intent check.
#[derive(Debug, Clone)]
pub struct IntentCheck {
    /// The intent to consume.
    pub intent_id: String,
    /// The token the IdP flow handed the client.
    pub token: String,
}

/// Challenge material requested alongside the checks.
#[derive(Debug, Clone, Default)]
pub struct RequestChallenges {
    /// Request a WebAuthn challenge.
    pub webauthn: Option<WebAuthnChallengeRequest>,
}

/// Parameters of a requested WebAuthn challenge.
#[derive(Debug, Clone)]
pub struct WebAuthnChallengeRequest {
    /// Required authenticator user verification.
    pub user_verification: UserVerificationRequirement,
    /// Relying-party domain; empty falls back to the configured external
    /// domain.
    pub domain: String,
}

/// Challenge material returned to the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Challenges {
    /// `PublicKeyCredentialRequestOptions` for a requested WebAuthn
    /// challenge.
    pub webauthn: Option<serde_json::Value>,
}

/// One tagged check command, interpreted in list order.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Identify the user.
    CheckUser(UserSelector),
    /// Verify a password.
    CheckPassword(String),
    /// Verify an IdP intent.
    CheckIntent(IntentCheck),
    /// Verify a WebAuthn assertion.
    CheckWebAuthn(Vec<u8>),
    /// Issue a WebAuthn challenge.
    Challenge(WebAuthnChallengeRequest),
}

impl Checks {
    /// Lower the request into the canonical command order.
    #[must_use]
    pub fn into_commands(self, challenges: Option<RequestChallenges>) -> Vec<SessionCommand> {
        let mut commands = Vec::with_capacity(5);
        if let Some(selector) = self.user {
            commands.push(SessionCommand::CheckUser(selector));
        }
        if let Some(password) = self.password {
            commands.push(SessionCommand::CheckPassword(password));
        }
        if let Some(intent) = self.intent {
            commands.push(SessionCommand::CheckIntent(intent));
        }
        if let Some(assertion) = self.webauthn {
            commands.push(SessionCommand::CheckWebAuthn(assertion));
        }
        if let Some(request) = challenges.and_then(|c| c.webauthn) {
            commands.push(SessionCommand::Challenge(request));
        }
        commands
    }
}

/// Result of a successful `CreateSession`.
#[derive(Debug, Clone)]
pub struct SessionCreated {
    /// The new session's id.
    pub session_id: String,
    /// Freshly minted bearer token; returned exactly once.
    pub session_token: String,
    /// Challenge material, if requested.
    pub challenges: Challenges,
    /// Mutation details.
    pub details: ObjectDetails,
}

/// Result of a successful `SetSession`.
#[derive(Debug, Clone)]
pub struct SessionUpdated {
    /// The token authorizing follow-up operations: freshly rotated when
    /// the mutation appended events, otherwise the caller's own token
    /// echoed back.
    pub session_token: String,
    /// Challenge material, if requested.
    pub challenges: Challenges,
    /// Mutation details.
    pub details: ObjectDetails,
}

struct BatchOutcome {
    events: Vec<SessionEvent>,
    challenges: Challenges,
}

/// The session command engine.
///
/// Immutable after [`start`](Commands::start); shared by reference across
/// request tasks.
pub struct Commands<U, W, P, R> {
    event_store: Arc<dyn EventStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    users: U,
    webauthn: W,
    password_hasher: P,
    rate_limiter: R,
    tokens: SessionTokenService,
    intents: IntentTokenService,
    config: SessionConfig,
}

impl<U, W, P, R> Commands<U, W, P, R>
where
    U: UserDirectory,
    W: WebAuthnProvider,
    P: PasswordHasher,
    R: RateLimiter,
{
    /// Assemble the engine from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidArgument`] when no external domain
    /// is configured.
    #[allow(clippy::too_many_arguments)] // Startup wiring mirrors the deployment surface
    pub fn start(
        event_store: Arc<dyn EventStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        users: U,
        webauthn: W,
        password_hasher: P,
        rate_limiter: R,
        token_key: &EncryptionKey,
        config: SessionConfig,
    ) -> Result<Self> {
        if config.external_domain.is_empty() {
            return Err(SessionError::InvalidArgument(
                "no external domain specified".into(),
            ));
        }
        Ok(Self {
            event_store,
            ids,
            clock,
            users,
            webauthn,
            password_hasher,
            rate_limiter,
            tokens: SessionTokenService::new(token_key.clone()),
            intents: IntentTokenService::new(token_key.clone()),
            config,
        })
    }

    /// The token service, for transports that verify read access.
    #[must_use]
    pub const fn token_service(&self) -> &SessionTokenService {
        &self.tokens
    }

    /// The intent token service, for the IdP flow to issue intent tokens.
    #[must_use]
    pub const fn intent_service(&self) -> &IntentTokenService {
        &self.intents
    }

    /// Create a session, running the given checks and challenge requests.
    ///
    /// Appends `session.added`, one event per successful check, an
    /// optional challenge event, `session.metadata.set`, and
    /// `session.token.set`, atomically. The plain bearer token is returned
    /// exactly once.
    ///
    /// # Errors
    ///
    /// Check failures surface with their own kinds; nothing is appended in
    /// that case.
    pub async fn create_session(
        &self,
        ctx: &RequestContext,
        checks: Checks,
        metadata: Metadata,
        challenges: Option<RequestChallenges>,
    ) -> Result<SessionCreated> {
        let session_id = self.ids.next_id();
        let model = SessionWriteModel::new(&session_id);

        let outcome = self
            .run_commands(ctx, &model, checks.into_commands(challenges))
            .await?;

        let mut events = vec![SessionEvent::Added {
            resource_owner: ctx.resource_owner.clone(),
        }];
        events.extend(outcome.events);
        if !metadata.is_empty() {
            events.push(SessionEvent::MetadataSet { metadata });
        }
        let minted = self.tokens.mint(&session_id, self.ids.as_ref())?;
        events.push(SessionEvent::TokenSet {
            token_id: minted.token_id,
            secret_digest: minted.secret_digest,
        });

        let stored = self
            .push(ctx, &session_id, Some(Sequence::INITIAL), &events)
            .await?;

        tracing::info!(session_id = %session_id, events = stored.len(), "session created");

        Ok(SessionCreated {
            details: details_from(&stored, &ctx.resource_owner),
            session_id,
            session_token: minted.bearer,
            challenges: outcome.challenges,
        })
    }

    /// Mutate an existing session.
    ///
    /// Requires the current bearer token. The token is rotated whenever
    /// the mutation appends events; an effectively-empty update echoes the
    /// caller's token and appends nothing.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionNotFound`]: unknown session
    /// - [`SessionError::TokenMismatch`]: token invalid
    /// - [`SessionError::SessionTerminated`]: state is not active
    /// - check failures with their own kinds; `Conflict` after the retry
    ///   budget is exhausted
    pub async fn update_session(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        session_token: &str,
        checks: Checks,
        metadata: Metadata,
        challenges: Option<RequestChallenges>,
    ) -> Result<SessionUpdated> {
        let mut attempt = 0_u32;
        loop {
            let result = self
                .try_update(
                    ctx,
                    session_id,
                    session_token,
                    checks.clone(),
                    metadata.clone(),
                    challenges.clone(),
                )
                .await;

            match result {
                Err(error) if error.is_retryable() && attempt < self.config.conflict_retries => {
                    attempt += 1;
                    tracing::debug!(session_id = %session_id, attempt, "conflict, retrying update");
                    tokio::time::sleep(self.config.conflict_backoff * 2_u32.pow(attempt - 1))
                        .await;
                }
                other => return other,
            }
        }
    }

    async fn try_update(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        session_token: &str,
        checks: Checks,
        metadata: Metadata,
        challenges: Option<RequestChallenges>,
    ) -> Result<SessionUpdated> {
        let model = self.load_session(ctx, session_id).await?;
        self.authorize_token(&model, session_id, session_token)?;
        if model.state != SessionState::Active {
            return Err(SessionError::SessionTerminated);
        }

        let outcome = self
            .run_commands(ctx, &model, checks.into_commands(challenges))
            .await?;

        let mut events = outcome.events;
        if !metadata.is_empty() {
            events.push(SessionEvent::MetadataSet { metadata });
        }

        if events.is_empty() {
            // Nothing changed: retain the current token, append nothing.
            return Ok(SessionUpdated {
                session_token: session_token.to_string(),
                challenges: outcome.challenges,
                details: details_from_model(&model),
            });
        }

        let minted = self.tokens.mint(session_id, self.ids.as_ref())?;
        events.push(SessionEvent::TokenSet {
            token_id: minted.token_id,
            secret_digest: minted.secret_digest,
        });

        let stored = self
            .push(ctx, session_id, Some(model.sequence), &events)
            .await?;

        tracing::info!(session_id = %session_id, events = stored.len(), "session updated");

        Ok(SessionUpdated {
            session_token: minted.bearer,
            challenges: outcome.challenges,
            details: details_from(&stored, &model.resource_owner),
        })
    }

    /// Terminate a session.
    ///
    /// Idempotent: terminating a terminated session succeeds without new
    /// events. Authorized for the session's creator or any holder of the
    /// current token.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionNotFound`]: unknown session
    /// - [`SessionError::TokenMismatch`] / [`SessionError::NotPermitted`]:
    ///   caller not authorized
    pub async fn terminate_session(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        session_token: Option<&str>,
    ) -> Result<ObjectDetails> {
        let mut attempt = 0_u32;
        loop {
            let result = self.try_terminate(ctx, session_id, session_token).await;
            match result {
                Err(error) if error.is_retryable() && attempt < self.config.conflict_retries => {
                    attempt += 1;
                    tokio::time::sleep(self.config.conflict_backoff * 2_u32.pow(attempt - 1))
                        .await;
                }
                other => return other,
            }
        }
    }

    async fn try_terminate(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        session_token: Option<&str>,
    ) -> Result<ObjectDetails> {
        let model = self.load_session(ctx, session_id).await?;

        if model.state == SessionState::Terminated {
            return Ok(details_from_model(&model));
        }

        match session_token {
            Some(token) => self.authorize_token(&model, session_id, token)?,
            None => {
                if ctx.caller_user_id != model.creator {
                    return Err(SessionError::NotPermitted);
                }
            }
        }

        let stored = self
            .push(
                ctx,
                session_id,
                Some(model.sequence),
                &[SessionEvent::Terminated],
            )
            .await?;

        tracing::info!(session_id = %session_id, "session terminated");

        Ok(details_from(&stored, &model.resource_owner))
    }

    /// Replay a session's events into a write model.
    async fn load_session(
        &self,
        ctx: &RequestContext,
        session_id: &str,
    ) -> Result<SessionWriteModel> {
        let filter = EventFilter::new(ctx.instance_id.clone(), SESSION_AGGREGATE)
            .aggregate_id(AggregateId::new(session_id));
        let events = self.event_store.filter(filter).await?;

        let mut model = SessionWriteModel::new(session_id);
        model.append_and_reduce(&events)?;
        if !model.exists() {
            return Err(SessionError::SessionNotFound(session_id.to_string()));
        }
        Ok(model)
    }

    fn authorize_token(
        &self,
        model: &SessionWriteModel,
        session_id: &str,
        bearer: &str,
    ) -> Result<()> {
        let token_id = model.token_id.as_deref().ok_or(SessionError::TokenMismatch)?;
        self.tokens.verify(
            bearer,
            session_id,
            token_id,
            model.token_secret_digest.as_deref(),
        )
    }

    /// Interpret the command list against the write model.
    ///
    /// `current_user` starts from the model's user factor and is updated
    /// by an in-batch `CheckUser`, which is how later checks in the same
    /// batch see the user.
    async fn run_commands(
        &self,
        ctx: &RequestContext,
        model: &SessionWriteModel,
        commands: Vec<SessionCommand>,
    ) -> Result<BatchOutcome> {
        let now = self.clock.now();
        let mut current_user: Option<ResolvedUser> = model.user_factor.as_ref().map(|f| {
            ResolvedUser {
                user_id: f.user_id.clone(),
                login_name: f.login_name.clone(),
                display_name: f.display_name.clone(),
                resource_owner: f.resource_owner.clone(),
            }
        });
        let mut events = Vec::with_capacity(commands.len());
        let mut challenges = Challenges::default();

        for command in commands {
            match command {
                SessionCommand::CheckUser(selector) => {
                    let user = self.users.resolve_user(&ctx.instance_id, &selector).await?;
                    if let Some(existing) = &current_user {
                        if existing.user_id != user.user_id {
                            return Err(SessionError::UserMismatch);
                        }
                    }
                    events.push(SessionEvent::UserChecked {
                        user_id: user.user_id.clone(),
                        login_name: user.login_name.clone(),
                        display_name: user.display_name.clone(),
                        resource_owner: user.resource_owner.clone(),
                        checked_at: now,
                    });
                    current_user = Some(user);
                }

                SessionCommand::CheckPassword(password) => {
                    let user = current_user
                        .as_ref()
                        .ok_or(SessionError::UserCheckMissing("password"))?;
                    self.rate_limiter
                        .check_and_record(
                            &user.user_id,
                            self.config.password_max_attempts,
                            self.config.password_attempt_window,
                        )
                        .await?;
                    let hash = self
                        .users
                        .password_hash(&ctx.instance_id, &user.user_id)
                        .await?
                        .ok_or(SessionError::InvalidCredentials)?;
                    self.password_hasher.verify(&password, &hash)?;
                    self.rate_limiter.reset(&user.user_id).await;
                    events.push(SessionEvent::PasswordChecked { checked_at: now });
                }

                SessionCommand::CheckIntent(intent) => {
                    let user = current_user
                        .as_ref()
                        .ok_or(SessionError::UserCheckMissing("intent"))?;
                    self.intents.verify(
                        &intent.token,
                        &intent.intent_id,
                        &user.user_id,
                        now,
                        self.config.intent_max_age,
                    )?;
                    events.push(SessionEvent::IntentChecked { checked_at: now });
                }

                SessionCommand::CheckWebAuthn(assertion_data) => {
                    let user = current_user
                        .as_ref()
                        .ok_or(SessionError::UserCheckMissing("webauthn"))?;
                    let challenge = model
                        .pending_challenge
                        .as_ref()
                        .ok_or(SessionError::ChallengeMissing)?;
                    if now - challenge.challenged_at > self.config.challenge_ttl {
                        return Err(SessionError::ChallengeExpired);
                    }

                    let passkeys = self.users.passkeys(&ctx.instance_id, &user.user_id).await?;
                    let outcome = self.webauthn.finish_authentication(
                        &challenge.rp_domain,
                        &assertion_data,
                        &challenge.verification_state,
                        &passkeys,
                    )?;

                    if challenge.user_verification == UserVerificationRequirement::Required
                        && !outcome.user_verified
                    {
                        return Err(SessionError::UserVerificationRequired);
                    }
                    let user_verified = outcome.user_verified
                        && challenge.user_verification != UserVerificationRequirement::Discouraged;

                    events.push(SessionEvent::WebAuthnChecked {
                        checked_at: now,
                        user_verified,
                    });
                }

                SessionCommand::Challenge(request) => {
                    let rp_domain = if request.domain.is_empty() {
                        self.config.external_domain.clone()
                    } else {
                        request.domain
                    };
                    let passkeys = match &current_user {
                        Some(user) => self.users.passkeys(&ctx.instance_id, &user.user_id).await?,
                        None => Vec::new(),
                    };
                    let issued = self.webauthn.begin_authentication(&rp_domain, &passkeys)?;

                    challenges.webauthn = Some(issued.credential_request_options.clone());
                    events.push(SessionEvent::WebAuthnChallenged {
                        user_verification: request.user_verification,
                        rp_domain,
                        credential_request_options: issued.credential_request_options,
                        verification_state: issued.verification_state,
                    });
                }
            }
        }

        Ok(BatchOutcome { events, challenges })
    }

    async fn push(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        expected: Option<Sequence>,
        events: &[SessionEvent],
    ) -> Result<Vec<StoredEvent>> {
        let pending: Vec<PendingEvent> = events
            .iter()
            .map(|event| event.to_pending(&ctx.caller_user_id))
            .collect::<std::result::Result<_, _>>()?;

        let aggregate = Aggregate::new(
            ctx.instance_id.clone(),
            session_aggregate_type(),
            AggregateId::new(session_id),
        );

        Ok(self.event_store.push(aggregate, expected, pending).await?)
    }
}

impl<U, W, P, R> std::fmt::Debug for Commands<U, W, P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commands")
            .field("external_domain", &self.config.external_domain)
            .finish_non_exhaustive()
    }
}

fn details_from(stored: &[StoredEvent], resource_owner: &str) -> ObjectDetails {
    let last = stored.last();
    ObjectDetails {
        sequence: last.map_or(0, |e| e.sequence.value()),
        change_date: last.map_or_else(chrono::Utc::now, |e| e.created_at),
        resource_owner: resource_owner.to_string(),
    }
}

fn details_from_model(model: &SessionWriteModel) -> ObjectDetails {
    ObjectDetails {
        sequence: model.sequence.value(),
        change_date: model
            .change_date
            .or(model.creation_date)
            .unwrap_or_else(chrono::Utc::now),
        resource_owner: model.resource_owner.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checks_lower_in_canonical_order() {
        let checks = Checks {
            webauthn: Some(vec![1]),
            password: Some("hunter2".into()),
            user: Some(UserSelector::ByLoginName("alice".into())),
            intent: Some(IntentCheck {
                intent_id: "i-1".into(),
                token: "t".into(),
            }),
        };
        let commands = checks.into_commands(Some(RequestChallenges {
            webauthn: Some(WebAuthnChallengeRequest {
                user_verification: UserVerificationRequirement::Preferred,
                domain: String::new(),
            }),
        }));

        let kinds: Vec<&str> = commands
            .iter()
            .map(|c| match c {
                SessionCommand::CheckUser(_) => "user",
                SessionCommand::CheckPassword(_) => "password",
                SessionCommand::CheckIntent(_) => "intent",
                SessionCommand::CheckWebAuthn(_) => "webauthn",
                SessionCommand::Challenge(_) => "challenge",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["user", "password", "intent", "webauthn", "challenge"]
        );
    }

    #[test]
    fn empty_checks_lower_to_nothing() {
        assert!(Checks::default().into_commands(None).is_empty());
    }
}
