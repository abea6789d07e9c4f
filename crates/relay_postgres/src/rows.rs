//! Row types bridging Postgres rows and domain types.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use relay_core::types::{Answer, Query, QueryStatus};

/// Raw `queries` row; `status` stays text until parsed.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgQueryRow {
    pub id: Uuid,
    pub query: String,
    pub user_id: String,
    pub room_name: String,
    pub job_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub answer_id: Option<Uuid>,
    pub resolved_by: Option<String>,
    pub last_response_at: Option<DateTime<Utc>>,
}

impl TryFrom<PgQueryRow> for Query {
    type Error = String;

    fn try_from(row: PgQueryRow) -> Result<Self, Self::Error> {
        let status = QueryStatus::parse(&row.status)
            .ok_or_else(|| format!("unknown query status: {}", row.status))?;
        Ok(Query {
            id: row.id,
            query: row.query,
            user_id: row.user_id,
            room_name: row.room_name,
            job_id: row.job_id,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deadline: row.deadline,
            answer_id: row.answer_id,
            resolved_by: row.resolved_by,
            last_response_at: row.last_response_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PgAnswerRow {
    pub id: Uuid,
    pub query_id: Uuid,
    pub answer_text: String,
    pub resolved_by: Option<String>,
    pub room_name: String,
    pub created_at: DateTime<Utc>,
    pub spoken: bool,
    pub spoken_at: Option<DateTime<Utc>>,
}

impl From<PgAnswerRow> for Answer {
    fn from(row: PgAnswerRow) -> Self {
        Answer {
            id: row.id,
            query_id: row.query_id,
            answer_text: row.answer_text,
            resolved_by: row.resolved_by,
            room_name: row.room_name,
            created_at: row.created_at,
            spoken: row.spoken,
            spoken_at: row.spoken_at,
        }
    }
}
