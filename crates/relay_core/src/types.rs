//! Domain types for the escalation ledger and the retrieval index.
//!
//! Four persisted collections: `queries`, `timers`, `answers`,
//! `answers_index`. The `Query` record is the single source of truth for the
//! lifecycle; everything else hangs off it by id.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the retrieval collection exposed on the vector-search surface.
pub const ANSWERS_INDEX_COLLECTION: &str = "answers_index";

// ── Query lifecycle ───────────────────────────────────────────

/// Lifecycle state of an escalated query.
///
/// Legal transitions: `pending → answered` and `pending → unresolved`.
/// A non-pending query may only change again through the one sanctioned
/// exception: a late supervisor answer moves `unresolved → answered`
/// (see `LedgerStore::commit_answer`). The deadline scheduler never touches
/// a non-pending query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Pending,
    Answered,
    Unresolved,
}

impl QueryStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Answered => "answered",
            Self::Unresolved => "unresolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "answered" => Some(Self::Answered),
            "unresolved" => Some(Self::Unresolved),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a guarded lifecycle transition.
///
/// `AlreadyTerminal` is the idempotency guard in action: the transition was
/// detected as illegal (query no longer pending) and rejected without side
/// effects. Race losers between expiry and commit land here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    AlreadyTerminal,
}

// ── Query ─────────────────────────────────────────────────────

/// One escalated question. Append-only: never deleted, mutated only by the
/// answer committer (→ answered) or the deadline scheduler (→ unresolved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: Uuid,
    pub query: String,
    pub user_id: String,
    /// Conversation the question came from; the notification bridge filters
    /// its subscription on this.
    pub room_name: String,
    /// Job/session id of the originating agent run.
    pub job_id: String,
    pub status: QueryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_response_at: Option<DateTime<Utc>>,
}

impl Query {
    /// Build a fresh pending query with its deadline set to `now + window`.
    pub fn new(
        query: impl Into<String>,
        user_id: impl Into<String>,
        room_name: impl Into<String>,
        job_id: impl Into<String>,
        window: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            user_id: user_id.into(),
            room_name: room_name.into(),
            job_id: job_id.into(),
            status: QueryStatus::Pending,
            created_at: now,
            updated_at: now,
            deadline: now + window,
            answer_id: None,
            resolved_by: None,
            last_response_at: None,
        }
    }

    /// The deadline timer paired 1:1 with this query. Created in the same
    /// atomic unit as the query itself; a query without its timer would
    /// never expire.
    pub fn timer(&self) -> DeadlineTimer {
        DeadlineTimer {
            query_id: self.id,
            fire_at: self.deadline,
        }
    }
}

/// Fields required to open a new query. Mirrors the `POST /queries` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuery {
    pub query: String,
    pub user_id: String,
    pub room_name: String,
    pub job_id: String,
}

/// Conversation context carried by the orchestrator when it escalates.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub user_id: String,
    pub room_name: String,
    pub job_id: String,
}

// ── Deadline timer ────────────────────────────────────────────

/// Scheduled expiry, 1:1 with a pending query (keyed by the query id).
/// Consumed exactly once when due; firing against a non-pending query is a
/// no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineTimer {
    pub query_id: Uuid,
    pub fire_at: DateTime<Utc>,
}

// ── Answer ────────────────────────────────────────────────────

/// A supervisor's response to exactly one query. At most one per query,
/// created only inside the commit transaction. `spoken`/`spoken_at` is the
/// delivery marker guarding at-most-once speech.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub id: Uuid,
    pub query_id: Uuid,
    pub answer_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    /// Denormalized from the owning query so the notification subscription
    /// filters without a join.
    pub room_name: String,
    pub created_at: DateTime<Utc>,
    pub spoken: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spoken_at: Option<DateTime<Utc>>,
}

/// Result of a successful answer commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerReceipt {
    pub answer_id: Uuid,
    pub query_id: Uuid,
    pub status: QueryStatus,
}

// ── Index entry ───────────────────────────────────────────────

/// Denormalized, search-optimized mirror of an answer plus its embedding.
/// Shares its id with the answer and is created in the same transaction —
/// the two are never observed independently of each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: Uuid,
    pub query_id: Uuid,
    pub answer_text: String,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
}

/// One retrieval hit: an indexed answer plus its cosine similarity to the
/// search vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMatch {
    pub answer_id: Uuid,
    pub query_id: Uuid,
    pub answer_text: String,
    pub similarity: f32,
}
