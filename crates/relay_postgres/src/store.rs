//! Newtype adapters over PgPool, one per port.
//!
//! The answer commit is the one multi-record transaction: answer row, index
//! row, and the guarded query update land together or not at all. The guard
//! (`answer_id IS NULL` on the update) is what turns a lost race into a
//! clean `Conflict` instead of partial state.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use relay_core::error::{RelayError, Result};
use relay_core::ports::{DeliveryStore, LedgerStore, TimerStore, VectorIndexStore};
use relay_core::types::{
    Answer, DeadlineTimer, IndexEntry, Query, SearchMatch, TransitionOutcome,
};

use crate::rows::{PgAnswerRow, PgQueryRow};

const QUERY_COLUMNS: &str = "id, query, user_id, room_name, job_id, status, \
     created_at, updated_at, deadline, answer_id, resolved_by, last_response_at";

const ANSWER_COLUMNS: &str =
    "id, query_id, answer_text, resolved_by, room_name, created_at, spoken, spoken_at";

/// All port implementations over one pool.
pub struct PgStores {
    pub ledger: PgLedgerStore,
    pub timers: PgTimerStore,
    pub delivery: PgDeliveryStore,
    pub index: PgVectorIndexStore,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self {
            ledger: PgLedgerStore::new(pool.clone()),
            timers: PgTimerStore::new(pool.clone()),
            delivery: PgDeliveryStore::new(pool.clone()),
            index: PgVectorIndexStore::new(pool),
        }
    }
}

// ── PgLedgerStore ─────────────────────────────────────────────

pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_query(&self, query: &Query, timer: &DeadlineTimer) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RelayError::Internal(anyhow!(e)))?;

        sqlx::query(
            "INSERT INTO queries \
                 (id, query, user_id, room_name, job_id, status, \
                  created_at, updated_at, deadline) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(query.id)
        .bind(&query.query)
        .bind(&query.user_id)
        .bind(&query.room_name)
        .bind(&query.job_id)
        .bind(query.status.as_str())
        .bind(query.created_at)
        .bind(query.updated_at)
        .bind(query.deadline)
        .execute(&mut *tx)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;

        sqlx::query("INSERT INTO timers (query_id, fire_at) VALUES ($1, $2)")
            .bind(timer.query_id)
            .bind(timer.fire_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| RelayError::Internal(anyhow!(e)))?;

        tx.commit()
            .await
            .map_err(|e| RelayError::Internal(anyhow!(e)))?;
        Ok(())
    }

    async fn get_query(&self, id: Uuid) -> Result<Option<Query>> {
        let row = sqlx::query_as::<_, PgQueryRow>(&format!(
            "SELECT {QUERY_COLUMNS} FROM queries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;
        row.map(|r| {
            r.try_into()
                .map_err(|e: String| RelayError::Internal(anyhow!(e)))
        })
        .transpose()
    }

    async fn list_queries(&self) -> Result<Vec<Query>> {
        let rows = sqlx::query_as::<_, PgQueryRow>(&format!(
            "SELECT {QUERY_COLUMNS} FROM queries ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;
        rows.into_iter()
            .map(|r| {
                r.try_into()
                    .map_err(|e: String| RelayError::Internal(anyhow!(e)))
            })
            .collect()
    }

    async fn mark_unresolved(&self, id: Uuid, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        // The status filter is the pending-only transition guard; a query
        // already settled by a commit matches zero rows.
        let result = sqlx::query(
            "UPDATE queries SET status = 'unresolved', updated_at = $2 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;

        if result.rows_affected() == 1 {
            Ok(TransitionOutcome::Applied)
        } else {
            Ok(TransitionOutcome::AlreadyTerminal)
        }
    }

    async fn commit_answer(&self, answer: &Answer, entry: &IndexEntry) -> Result<Query> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RelayError::Internal(anyhow!(e)))?;

        let row = sqlx::query_as::<_, PgQueryRow>(&format!(
            "SELECT {QUERY_COLUMNS} FROM queries WHERE id = $1 FOR UPDATE"
        ))
        .bind(answer.query_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;

        let current = match row {
            Some(row) => row,
            None => return Err(RelayError::NotFound(format!("query {}", answer.query_id))),
        };
        if current.answer_id.is_some() {
            return Err(RelayError::Conflict(format!(
                "query {} already answered",
                answer.query_id
            )));
        }

        sqlx::query(&format!(
            "INSERT INTO answers ({ANSWER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(answer.id)
        .bind(answer.query_id)
        .bind(&answer.answer_text)
        .bind(&answer.resolved_by)
        .bind(&answer.room_name)
        .bind(answer.created_at)
        .bind(answer.spoken)
        .bind(answer.spoken_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;

        sqlx::query(
            "INSERT INTO answers_index \
                 (id, query_id, answer_text, embedding, embedding_model, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.id)
        .bind(entry.query_id)
        .bind(&entry.answer_text)
        .bind(Vector::from(entry.embedding.clone()))
        .bind(&entry.embedding_model)
        .bind(entry.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;

        // Second half of the optimistic check: a concurrent commit that got
        // here first set answer_id between our read and this update.
        let updated = sqlx::query(
            "UPDATE queries SET \
                 status = 'answered', answer_id = $2, updated_at = $3, \
                 last_response_at = $3, resolved_by = COALESCE($4, resolved_by) \
             WHERE id = $1 AND answer_id IS NULL",
        )
        .bind(answer.query_id)
        .bind(answer.id)
        .bind(answer.created_at)
        .bind(&answer.resolved_by)
        .execute(&mut *tx)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;
        if updated.rows_affected() == 0 {
            return Err(RelayError::Conflict(format!(
                "query {} answered concurrently",
                answer.query_id
            )));
        }

        let settled = sqlx::query_as::<_, PgQueryRow>(&format!(
            "SELECT {QUERY_COLUMNS} FROM queries WHERE id = $1"
        ))
        .bind(answer.query_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;

        tx.commit()
            .await
            .map_err(|e| RelayError::Internal(anyhow!(e)))?;

        tracing::debug!(query_id = %answer.query_id, answer_id = %answer.id, "answer commit applied");
        settled
            .try_into()
            .map_err(|e: String| RelayError::Internal(anyhow!(e)))
    }
}

// ── PgTimerStore ──────────────────────────────────────────────

pub struct PgTimerStore {
    pool: PgPool,
}

impl PgTimerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TimerStore for PgTimerStore {
    async fn due_timers(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeadlineTimer>> {
        let rows = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            "SELECT query_id, fire_at FROM timers \
             WHERE fire_at <= $1 ORDER BY fire_at LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;
        Ok(rows
            .into_iter()
            .map(|(query_id, fire_at)| DeadlineTimer { query_id, fire_at })
            .collect())
    }

    async fn delete_timer(&self, query_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM timers WHERE query_id = $1")
            .bind(query_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RelayError::Internal(anyhow!(e)))?;
        Ok(())
    }
}

// ── PgDeliveryStore ───────────────────────────────────────────

pub struct PgDeliveryStore {
    pool: PgPool,
}

impl PgDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryStore for PgDeliveryStore {
    async fn get_answer(&self, id: Uuid) -> Result<Option<Answer>> {
        let row = sqlx::query_as::<_, PgAnswerRow>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM answers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;
        Ok(row.map(Answer::from))
    }

    async fn list_answers(&self) -> Result<Vec<Answer>> {
        let rows = sqlx::query_as::<_, PgAnswerRow>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM answers ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;
        Ok(rows.into_iter().map(Answer::from).collect())
    }

    async fn undelivered_answers(&self, room_name: &str) -> Result<Vec<Answer>> {
        let rows = sqlx::query_as::<_, PgAnswerRow>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM answers \
             WHERE room_name = $1 AND NOT spoken ORDER BY created_at"
        ))
        .bind(room_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;
        Ok(rows.into_iter().map(Answer::from).collect())
    }

    async fn mark_spoken(&self, answer_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE answers SET spoken = TRUE, spoken_at = $2 WHERE id = $1",
        )
        .bind(answer_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;
        if result.rows_affected() == 0 {
            return Err(RelayError::NotFound(format!("answer {answer_id}")));
        }
        Ok(())
    }
}

// ── PgVectorIndexStore ────────────────────────────────────────

pub struct PgVectorIndexStore {
    pool: PgPool,
}

impl PgVectorIndexStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndexStore for PgVectorIndexStore {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchMatch>> {
        let query_vector = Vector::from(vector.to_vec());

        // `<=>` is pgvector's cosine distance; similarity = 1 - distance.
        // Ordering and the similarity floor mirror relay_core::index.
        let rows = sqlx::query_as::<_, (Uuid, Uuid, String, f32)>(
            "SELECT id, query_id, answer_text, \
                    (1 - (embedding <=> $1))::float4 AS similarity \
             FROM answers_index \
             WHERE 1 - (embedding <=> $1) >= $2 \
             ORDER BY similarity DESC, created_at DESC \
             LIMIT $3",
        )
        .bind(query_vector)
        .bind(min_similarity as f64)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Internal(anyhow!(e)))?;

        Ok(rows
            .into_iter()
            .map(|(answer_id, query_id, answer_text, similarity)| SearchMatch {
                answer_id,
                query_id,
                answer_text,
                similarity,
            })
            .collect())
    }
}
