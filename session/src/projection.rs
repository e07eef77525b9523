//! The `sessions4` read-model projection.
//!
//! Event-driven, at-least-once, idempotent: every session event reduces
//! to a single SQL statement against `projections.sessions4`, and each
//! update also sets `change_date` and `sequence`. Rows are deleted on
//! terminate; `org.removed` flags `owner_removed`; `instance.removed`
//! wipes the tenant.

use crate::events::{INSTANCE_REMOVED, ORG_REMOVED, SessionEvent};
use crate::state::Metadata;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use portcullis_core::aggregate::AggregateType;
use portcullis_core::event::StoredEvent;
use portcullis_core::projection::{
    Projection, ProjectionError, Result, SqlParam, Statement,
};

/// Name of the projection, used as its cursor key.
pub const PROJECTION_NAME: &str = "sessions4";

/// Reduces session, org, and instance events into `sessions4` statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionProjection;

impl SessionProjection {
    /// Create the projection.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn reduce_session(event: &StoredEvent) -> Result<Vec<Statement>> {
        let session_event = SessionEvent::from_stored(event)
            .map_err(|e| ProjectionError::EventProcessing(e.to_string()))?;

        let id = event.aggregate.id.to_string();
        let instance_id = event.aggregate.instance_id.to_string();

        #[allow(clippy::cast_possible_wrap)] // Wraps at 2^63 events per aggregate
        let sequence = event.sequence.value() as i64;
        let change_date = SqlParam::Timestamp(event.created_at);

        let statement = match session_event {
            SessionEvent::Added { resource_owner } => Statement::new(
                "INSERT INTO projections.sessions4 (id, instance_id, creation_date, change_date, sequence, state, resource_owner, creator) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (instance_id, id) DO NOTHING",
                vec![
                    SqlParam::Text(id),
                    SqlParam::Text(instance_id),
                    SqlParam::Timestamp(event.created_at),
                    SqlParam::Timestamp(event.created_at),
                    SqlParam::I64(sequence),
                    SqlParam::Text("active".to_string()),
                    SqlParam::Text(resource_owner),
                    SqlParam::Text(event.creator.clone()),
                ],
            ),

            SessionEvent::UserChecked {
                user_id,
                checked_at,
                ..
            } => Statement::new(
                "UPDATE projections.sessions4 SET (change_date, sequence, user_id, user_checked_at) = ($1, $2, $3, $4) WHERE (id = $5) AND (instance_id = $6)",
                vec![
                    change_date,
                    SqlParam::I64(sequence),
                    SqlParam::Text(user_id),
                    SqlParam::Timestamp(checked_at),
                    SqlParam::Text(id),
                    SqlParam::Text(instance_id),
                ],
            ),

            SessionEvent::PasswordChecked { checked_at } => Statement::new(
                "UPDATE projections.sessions4 SET (change_date, sequence, password_checked_at) = ($1, $2, $3) WHERE (id = $4) AND (instance_id = $5)",
                vec![
                    change_date,
                    SqlParam::I64(sequence),
                    SqlParam::Timestamp(checked_at),
                    SqlParam::Text(id),
                    SqlParam::Text(instance_id),
                ],
            ),

            SessionEvent::IntentChecked { checked_at } => Statement::new(
                "UPDATE projections.sessions4 SET (change_date, sequence, intent_checked_at) = ($1, $2, $3) WHERE (id = $4) AND (instance_id = $5)",
                vec![
                    change_date,
                    SqlParam::I64(sequence),
                    SqlParam::Timestamp(checked_at),
                    SqlParam::Text(id),
                    SqlParam::Text(instance_id),
                ],
            ),

            SessionEvent::WebAuthnChecked {
                checked_at,
                user_verified,
            } => Statement::new(
                "UPDATE projections.sessions4 SET (change_date, sequence, webauthn_checked_at, webauthn_user_verified) = ($1, $2, $3, $4) WHERE (id = $5) AND (instance_id = $6)",
                vec![
                    change_date,
                    SqlParam::I64(sequence),
                    SqlParam::Timestamp(checked_at),
                    SqlParam::Bool(user_verified),
                    SqlParam::Text(id),
                    SqlParam::Text(instance_id),
                ],
            ),

            SessionEvent::TokenSet { token_id, .. } => Statement::new(
                "UPDATE projections.sessions4 SET (change_date, sequence, token_id) = ($1, $2, $3) WHERE (id = $4) AND (instance_id = $5)",
                vec![
                    change_date,
                    SqlParam::I64(sequence),
                    SqlParam::Text(token_id),
                    SqlParam::Text(id),
                    SqlParam::Text(instance_id),
                ],
            ),

            SessionEvent::MetadataSet { metadata } => {
                let (upserts, deletions) = split_metadata(&metadata);
                Statement::new(
                    "UPDATE projections.sessions4 SET (change_date, sequence, metadata) = ($1, $2, (COALESCE(metadata, '{}'::jsonb) || $3::jsonb) - $4::text[]) WHERE (id = $5) AND (instance_id = $6)",
                    vec![
                        change_date,
                        SqlParam::I64(sequence),
                        SqlParam::Json(upserts),
                        SqlParam::TextArray(deletions),
                        SqlParam::Text(id),
                        SqlParam::Text(instance_id),
                    ],
                )
            }

            // The challenge is write-side state only; the read model does
            // not expose it, but the row still records the mutation.
            SessionEvent::WebAuthnChallenged { .. } => Statement::new(
                "UPDATE projections.sessions4 SET (change_date, sequence) = ($1, $2) WHERE (id = $3) AND (instance_id = $4)",
                vec![
                    change_date,
                    SqlParam::I64(sequence),
                    SqlParam::Text(id),
                    SqlParam::Text(instance_id),
                ],
            ),

            SessionEvent::Terminated => Statement::new(
                "DELETE FROM projections.sessions4 WHERE (id = $1) AND (instance_id = $2)",
                vec![SqlParam::Text(id), SqlParam::Text(instance_id)],
            ),
        };

        Ok(vec![statement])
    }

    fn reduce_org_removed(event: &StoredEvent) -> Vec<Statement> {
        vec![Statement::new(
            "UPDATE projections.sessions4 SET owner_removed = TRUE WHERE (instance_id = $1) AND (resource_owner = $2)",
            vec![
                SqlParam::Text(event.aggregate.instance_id.to_string()),
                SqlParam::Text(event.aggregate.id.to_string()),
            ],
        )]
    }

    fn reduce_instance_removed(event: &StoredEvent) -> Vec<Statement> {
        vec![Statement::new(
            "DELETE FROM projections.sessions4 WHERE (instance_id = $1)",
            vec![SqlParam::Text(event.aggregate.instance_id.to_string())],
        )]
    }
}

impl Projection for SessionProjection {
    fn name(&self) -> &str {
        PROJECTION_NAME
    }

    fn aggregate_types(&self) -> Vec<AggregateType> {
        vec![
            AggregateType::from("session"),
            AggregateType::from("org"),
            AggregateType::from("instance"),
        ]
    }

    fn reduce(&self, event: &StoredEvent) -> Result<Vec<Statement>> {
        match event.event_type.as_str() {
            ORG_REMOVED => Ok(Self::reduce_org_removed(event)),
            INSTANCE_REMOVED => Ok(Self::reduce_instance_removed(event)),
            ty if ty.starts_with("session.") => Self::reduce_session(event),
            _ => Ok(Vec::new()),
        }
    }
}

/// Split a metadata write into JSONB upserts (base64 values, the wire form
/// of opaque bytes) and the keys to delete (written with empty values).
fn split_metadata(metadata: &Metadata) -> (serde_json::Value, Vec<String>) {
    let mut upserts = serde_json::Map::new();
    let mut deletions = Vec::new();
    for (key, value) in metadata {
        if value.is_empty() {
            deletions.push(key.clone());
        } else {
            upserts.insert(
                key.clone(),
                serde_json::Value::String(STANDARD.encode(value)),
            );
        }
    }
    // Map iteration order is unspecified; keep the statement deterministic.
    deletions.sort();
    (serde_json::Value::Object(upserts), deletions)
}
