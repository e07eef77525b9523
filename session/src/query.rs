//! Read-side session queries over the `sessions4` projection.
//!
//! Queries join the session row with `login_names2` and `users8_humans` /
//! `users8` for display attributes. SQL construction is pure so tests can
//! assert the exact text and argument lists; only execution touches the
//! pool.
//!
//! Authorization: `session_by_id` verifies the supplied bearer against the
//! row's `token_id`; `search_sessions` always injects a
//! `creator = caller` predicate server-side.

use crate::error::{Result, SessionError};
use crate::state::{
    IntentFactor, Metadata, PasswordFactor, SessionState, UserFactor, WebAuthnFactor,
};
use crate::token::SessionTokenService;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use portcullis_core::projection::SqlParam;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};

const SESSION_COLUMNS: &str = "projections.sessions4.id, \
projections.sessions4.creation_date, \
projections.sessions4.change_date, \
projections.sessions4.sequence, \
projections.sessions4.state, \
projections.sessions4.resource_owner, \
projections.sessions4.creator, \
projections.sessions4.user_id, \
projections.sessions4.user_checked_at, \
projections.login_names2.login_name, \
projections.users8_humans.display_name, \
projections.users8.resource_owner, \
projections.sessions4.password_checked_at, \
projections.sessions4.intent_checked_at, \
projections.sessions4.webauthn_checked_at, \
projections.sessions4.webauthn_user_verified, \
projections.sessions4.metadata";

const SESSION_FROM: &str = " FROM projections.sessions4 \
LEFT JOIN projections.login_names2 ON projections.sessions4.user_id = projections.login_names2.user_id AND projections.sessions4.instance_id = projections.login_names2.instance_id \
LEFT JOIN projections.users8_humans ON projections.sessions4.user_id = projections.users8_humans.user_id AND projections.sessions4.instance_id = projections.users8_humans.instance_id \
LEFT JOIN projections.users8 ON projections.sessions4.user_id = projections.users8.id AND projections.sessions4.instance_id = projections.users8.instance_id";

/// A session as served to readers. The current `token_id` is consulted for
/// authorization but never exposed.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Session id.
    pub id: String,
    /// Creation time.
    pub creation_date: DateTime<Utc>,
    /// Last mutation time.
    pub change_date: DateTime<Utc>,
    /// Aggregate sequence.
    pub sequence: u64,
    /// Life-cycle state.
    pub state: SessionState,
    /// Organization owning the session.
    pub resource_owner: String,
    /// User that created the session.
    pub creator: String,
    /// User factor, if checked.
    pub user_factor: Option<UserFactor>,
    /// Password factor, if checked.
    pub password_factor: Option<PasswordFactor>,
    /// Intent factor, if checked.
    pub intent_factor: Option<IntentFactor>,
    /// WebAuthn factor, if checked.
    pub webauthn_factor: Option<WebAuthnFactor>,
    /// Session metadata.
    pub metadata: Metadata,
}

/// A page of search results with the total count.
#[derive(Debug, Clone, Default)]
pub struct Sessions {
    /// Total matching rows, independent of pagination.
    pub count: u64,
    /// The requested page.
    pub sessions: Vec<Session>,
}

/// Pagination of a search.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest {
    /// Rows to skip.
    pub offset: u64,
    /// Page size; 0 means no limit.
    pub limit: u64,
    /// Sort ascending by `(creation_date, id)`.
    pub asc: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 0,
            asc: true,
        }
    }
}

/// Caller-supplied search filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSearchQuery {
    /// Restrict to these session ids.
    Ids(Vec<String>),
}

/// A full search request.
#[derive(Debug, Clone, Default)]
pub struct SessionsSearchQueries {
    /// Pagination.
    pub request: SearchRequest,
    /// Filters.
    pub queries: Vec<SessionSearchQuery>,
}

/// Build the single-session query; binds `(session_id, instance_id)`.
#[must_use]
pub fn session_by_id_query() -> String {
    format!(
        "SELECT {SESSION_COLUMNS}, projections.sessions4.token_id{SESSION_FROM} \
         WHERE projections.sessions4.id = $1 AND projections.sessions4.instance_id = $2"
    )
}

/// Build the search query with the caller's mandatory creator predicate.
///
/// Returns the SQL text and the bind arguments in placeholder order.
#[must_use]
pub fn search_sessions_query(
    instance_id: &str,
    creator: &str,
    queries: &SessionsSearchQueries,
) -> (String, Vec<SqlParam>) {
    let mut sql = format!(
        "SELECT {SESSION_COLUMNS}, COUNT(*) OVER (){SESSION_FROM} \
         WHERE projections.sessions4.instance_id = $1 AND projections.sessions4.creator = $2"
    );
    let mut params = vec![
        SqlParam::Text(instance_id.to_string()),
        SqlParam::Text(creator.to_string()),
    ];

    for query in &queries.queries {
        match query {
            SessionSearchQuery::Ids(ids) => {
                params.push(SqlParam::TextArray(ids.clone()));
                sql.push_str(&format!(
                    " AND projections.sessions4.id = ANY(${})",
                    params.len()
                ));
            }
        }
    }

    let direction = if queries.request.asc { "ASC" } else { "DESC" };
    sql.push_str(&format!(
        " ORDER BY projections.sessions4.creation_date {direction}, projections.sessions4.id {direction}"
    ));

    if queries.request.limit > 0 {
        #[allow(clippy::cast_possible_wrap)] // Page sizes are small
        let limit = queries.request.limit as i64;
        params.push(SqlParam::I64(limit));
        sql.push_str(&format!(" LIMIT ${}", params.len()));
    }
    if queries.request.offset > 0 {
        #[allow(clippy::cast_possible_wrap)] // Offsets are small
        let offset = queries.request.offset as i64;
        params.push(SqlParam::I64(offset));
        sql.push_str(&format!(" OFFSET ${}", params.len()));
    }

    (sql, params)
}

/// Read-side query service.
pub struct Queries {
    pool: PgPool,
    tokens: SessionTokenService,
}

impl Queries {
    /// Create the query service over the read pool.
    #[must_use]
    pub const fn new(pool: PgPool, tokens: SessionTokenService) -> Self {
        Self { pool, tokens }
    }

    /// Load one session, authorized by its current bearer token.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionNotFound`]: no such row
    /// - [`SessionError::TokenMismatch`]: bearer does not match the row's
    ///   current token
    pub async fn session_by_id(
        &self,
        instance_id: &str,
        session_id: &str,
        session_token: &str,
    ) -> Result<Session> {
        let row = sqlx::query(&session_by_id_query())
            .bind(session_id)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SessionError::Unavailable(e.to_string()))?
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        let (session, token_id) = scan_session(&row)?;
        let token_id = token_id.ok_or(SessionError::TokenMismatch)?;
        self.tokens
            .verify(session_token, session_id, &token_id, None)?;

        Ok(session)
    }

    /// Search sessions, scoped to those created by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Unavailable`] on storage failure.
    pub async fn search_sessions(
        &self,
        instance_id: &str,
        caller_user_id: &str,
        queries: &SessionsSearchQueries,
    ) -> Result<Sessions> {
        let (sql, params) = search_sessions_query(instance_id, caller_user_id, queries);

        let mut query = sqlx::query(&sql);
        for param in &params {
            query = match param {
                SqlParam::Text(v) => query.bind(v),
                SqlParam::TextArray(v) => query.bind(v),
                SqlParam::I64(v) => query.bind(v),
                SqlParam::Bytes(v) => query.bind(v),
                SqlParam::Bool(v) => query.bind(v),
                SqlParam::Timestamp(v) => query.bind(v),
                SqlParam::Json(v) => query.bind(v),
                SqlParam::Null => query.bind(Option::<String>::None),
            };
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| SessionError::Unavailable(e.to_string()))?;

        let mut result = Sessions::default();
        for row in &rows {
            let (session, count) = scan_search_row(row)?;
            result.count = count;
            result.sessions.push(session);
        }
        Ok(result)
    }
}

impl std::fmt::Debug for Queries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queries").finish_non_exhaustive()
    }
}

fn scan_session(row: &PgRow) -> Result<(Session, Option<String>)> {
    let session = scan_common(row)?;
    let token_id: Option<String> = get(row, 17)?;
    Ok((session, token_id))
}

fn scan_search_row(row: &PgRow) -> Result<(Session, u64)> {
    let session = scan_common(row)?;
    let count: i64 = get(row, 17)?;
    #[allow(clippy::cast_sign_loss)] // COUNT(*) is non-negative
    let count = count as u64;
    Ok((session, count))
}

fn scan_common(row: &PgRow) -> Result<Session> {
    let sequence: i64 = get(row, 3)?;
    let state: String = get(row, 4)?;

    let user_id: Option<String> = get(row, 7)?;
    let user_checked_at: Option<DateTime<Utc>> = get(row, 8)?;
    let login_name: Option<String> = get(row, 9)?;
    let display_name: Option<String> = get(row, 10)?;
    let user_resource_owner: Option<String> = get(row, 11)?;

    let password_checked_at: Option<DateTime<Utc>> = get(row, 12)?;
    let intent_checked_at: Option<DateTime<Utc>> = get(row, 13)?;
    let webauthn_checked_at: Option<DateTime<Utc>> = get(row, 14)?;
    let webauthn_user_verified: Option<bool> = get(row, 15)?;
    let metadata: Option<serde_json::Value> = get(row, 16)?;

    let user_factor = match (user_id, user_checked_at) {
        (Some(user_id), Some(checked_at)) => Some(UserFactor {
            user_id,
            login_name: login_name.unwrap_or_default(),
            display_name: display_name.unwrap_or_default(),
            resource_owner: user_resource_owner.unwrap_or_default(),
            checked_at,
        }),
        _ => None,
    };

    #[allow(clippy::cast_sign_loss)] // Sequences are non-negative
    let sequence = sequence as u64;

    Ok(Session {
        id: get(row, 0)?,
        creation_date: get(row, 1)?,
        change_date: get(row, 2)?,
        sequence,
        state: parse_state(&state)?,
        resource_owner: get(row, 5)?,
        creator: get(row, 6)?,
        user_factor,
        password_factor: password_checked_at.map(|checked_at| PasswordFactor { checked_at }),
        intent_factor: intent_checked_at.map(|checked_at| IntentFactor { checked_at }),
        webauthn_factor: webauthn_checked_at.map(|checked_at| WebAuthnFactor {
            checked_at,
            user_verified: webauthn_user_verified.unwrap_or(false),
        }),
        metadata: decode_metadata(metadata.as_ref())?,
    })
}

fn get<'r, T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>>(
    row: &'r PgRow,
    index: usize,
) -> Result<T> {
    row.try_get(index)
        .map_err(|e| SessionError::Internal(format!("row scan at column {index}: {e}")))
}

fn parse_state(state: &str) -> Result<SessionState> {
    match state {
        "active" => Ok(SessionState::Active),
        "terminated" => Ok(SessionState::Terminated),
        other => Err(SessionError::Internal(format!(
            "unknown session state: {other}"
        ))),
    }
}

/// Metadata is stored as `{"key": "<base64 value>"}`.
fn decode_metadata(value: Option<&serde_json::Value>) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    let Some(serde_json::Value::Object(entries)) = value else {
        return Ok(metadata);
    };
    for (key, value) in entries {
        let serde_json::Value::String(encoded) = value else {
            return Err(SessionError::Internal("metadata value not a string".into()));
        };
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| SessionError::Internal(format!("metadata not base64: {e}")))?;
        metadata.insert(key.clone(), bytes);
    }
    Ok(metadata)
}
