//! Port traits for storage and external collaborators.
//!
//! Implemented by `relay_postgres` (production) and `relay_core::memory`
//! (tests / dev harness) — domain logic depends only on these traits. All
//! collaborator handles are constructor-injected; there are no module-level
//! singletons.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    Answer, DeadlineTimer, IndexEntry, Query, SearchMatch, TransitionOutcome,
};

// ── Query ledger ──────────────────────────────────────────────

/// Authoritative record of every escalated question and its lifecycle state.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert a new pending query and its paired deadline timer as one
    /// atomic unit. A query persisted without its timer would never expire.
    async fn create_query(&self, query: &Query, timer: &DeadlineTimer) -> Result<()>;

    /// Load a query by id. `Ok(None)` when absent.
    async fn get_query(&self, id: Uuid) -> Result<Option<Query>>;

    /// All queries, oldest first. Operational visibility only.
    async fn list_queries(&self) -> Result<Vec<Query>>;

    /// Expiry transition: `pending → unresolved`, setting `updated_at`.
    ///
    /// Returns `AlreadyTerminal` without side effects when the query is no
    /// longer pending — the idempotency guard that adjudicates the race
    /// between expiry and commit. Unknown ids also report `AlreadyTerminal`;
    /// the scheduler treats both as a swallowed no-op.
    async fn mark_unresolved(&self, id: Uuid, now: DateTime<Utc>) -> Result<TransitionOutcome>;

    /// The answer commit: one all-or-nothing transaction that inserts the
    /// answer, inserts its index entry, and updates the owning query to
    /// `answered` (answer_id, updated_at, last_response_at, resolved_by).
    ///
    /// Errors: `NotFound` if the query vanished; `Conflict` if it already
    /// carries an answer or a concurrent commit won. A query in `unresolved`
    /// is deliberately commit-able — a late human answer is still useful.
    /// Returns the updated query.
    async fn commit_answer(&self, answer: &Answer, entry: &IndexEntry) -> Result<Query>;
}

// ── Deadline timers ───────────────────────────────────────────

/// Durable store of pending expiries, polled by the deadline scheduler.
#[async_trait]
pub trait TimerStore: Send + Sync {
    /// Timers with `fire_at <= now`, oldest first, up to `limit`.
    /// Read-only: the timer stays in place until `delete_timer`, so a crash
    /// between firing and deletion re-fires on the next poll (at-least-once).
    async fn due_timers(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeadlineTimer>>;

    /// Consume a fired timer. Idempotent; deleting an absent timer is Ok.
    async fn delete_timer(&self, query_id: Uuid) -> Result<()>;
}

// ── Answer delivery ───────────────────────────────────────────

/// Answer reads plus the delivery marker owned by the notification bridge.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn get_answer(&self, id: Uuid) -> Result<Option<Answer>>;

    async fn list_answers(&self) -> Result<Vec<Answer>>;

    /// Answers for one conversation that have not been spoken yet, oldest
    /// first. This query is the bridge's resumable cursor: reconnecting and
    /// re-polling picks up exactly the records still owed to the room.
    async fn undelivered_answers(&self, room_name: &str) -> Result<Vec<Answer>>;

    /// Set the delivery marker (`spoken = true`, `spoken_at = at`).
    async fn mark_spoken(&self, answer_id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

// ── Semantic index ────────────────────────────────────────────

/// Vector-similarity search over indexed answers. Entries are written only
/// through `LedgerStore::commit_answer`; this port is observe-only.
#[async_trait]
pub trait VectorIndexStore: Send + Sync {
    /// Up to `top_k` entries ranked by descending cosine similarity,
    /// truncated at `min_similarity`, ties broken most-recent-first.
    /// An empty index yields an empty vec, not an error.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchMatch>>;
}

// ── External collaborators ────────────────────────────────────

/// Embedding model provider. Network-bound and retryable; always invoked off
/// the transactional critical path. Failures surface as
/// `RelayError::Upstream`, distinct from "found nothing".
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Identifier recorded on index entries, e.g. `text-embedding-3-small`.
    fn model_id(&self) -> &str;

    /// Configured embedding dimension; index entries must match it.
    fn dimension(&self) -> usize;
}

/// Speech output of one live conversation. The bridge hands answer text to
/// this sink; the speech/LLM pipeline behind it is out of scope.
#[async_trait]
pub trait SpeechSink: Send + Sync {
    async fn say(&self, room_name: &str, text: &str) -> Result<()>;
}
