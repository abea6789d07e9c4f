//! RelayService — the central domain service.
//!
//! Takes port traits via `Arc<dyn PortTrait>` so the same logic works against
//! Postgres or the in-memory harness. Covers query ledger operations, the
//! answer committer, semantic retrieval, and the escalation orchestrator.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::index;
use crate::ports::{DeliveryStore, EmbeddingClient, LedgerStore, VectorIndexStore};
use crate::types::{
    Answer, AnswerReceipt, ConversationContext, IndexEntry, NewQuery, Query, SearchMatch,
};

/// Fixed line spoken when a question is escalated. The agent must say exactly
/// this, and only once a query has actually been persisted.
pub const SUPERVISOR_ESCALATION_UTTERANCE: &str =
    "Let me check with my supervisor and get back to you.";

/// Spoken when escalation itself failed. Never the supervisor line: that
/// would be a promise the system cannot keep without a persisted query.
pub const ESCALATION_FAILURE_UTTERANCE: &str =
    "I'm sorry, I wasn't able to pass that on right now. Please ask me again in a moment.";

/// Tunables for retrieval and the query deadline.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// How long a query may stay pending before it expires to unresolved.
    pub deadline_window: Duration,
    /// Number of nearest neighbours consulted per retrieval.
    pub top_k: usize,
    /// Minimum cosine similarity for a retrieval hit.
    pub min_similarity: f32,
    /// Character budget for the concatenated retrieval utterance.
    pub char_budget: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            deadline_window: Duration::hours(24),
            top_k: 3,
            min_similarity: 0.60,
            char_budget: 1000,
        }
    }
}

pub struct RelayService {
    ledger: Arc<dyn LedgerStore>,
    delivery: Arc<dyn DeliveryStore>,
    index: Arc<dyn VectorIndexStore>,
    embedder: Arc<dyn EmbeddingClient>,
    config: ServiceConfig,
}

impl RelayService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        delivery: Arc<dyn DeliveryStore>,
        index: Arc<dyn VectorIndexStore>,
        embedder: Arc<dyn EmbeddingClient>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            ledger,
            delivery,
            index,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn embedding_dimension(&self) -> usize {
        self.embedder.dimension()
    }

    // ── Query ledger ──────────────────────────────────────────

    /// Open a new pending query and its paired deadline timer.
    /// Fire-and-forget from the conversation's point of view.
    pub async fn create_query(&self, new: NewQuery) -> Result<Query> {
        require_field(&new.query, "query")?;
        require_field(&new.user_id, "user_id")?;
        require_field(&new.room_name, "room_name")?;
        require_field(&new.job_id, "job_id")?;

        let query = Query::new(
            new.query.trim(),
            new.user_id,
            new.room_name,
            new.job_id,
            self.config.deadline_window,
        );
        let timer = query.timer();
        self.ledger.create_query(&query, &timer).await?;
        tracing::info!(query_id = %query.id, room = %query.room_name, "query escalated");
        Ok(query)
    }

    pub async fn get_query(&self, id: Uuid) -> Result<Query> {
        self.ledger
            .get_query(id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("query {id}")))
    }

    pub async fn list_queries(&self) -> Result<Vec<Query>> {
        self.ledger.list_queries().await
    }

    pub async fn get_answer(&self, id: Uuid) -> Result<Answer> {
        self.delivery
            .get_answer(id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("answer {id}")))
    }

    pub async fn list_answers(&self) -> Result<Vec<Answer>> {
        self.delivery.list_answers().await
    }

    // ── Answer committer ──────────────────────────────────────

    /// Commit a supervisor answer: embed the text, then run one atomic
    /// transaction that writes the answer, mirrors it into the retrieval
    /// index, and moves the owning query to `answered`.
    ///
    /// The embedding call runs before the transaction opens; if it fails
    /// nothing is written. `Conflict` means the whole call is safe to retry.
    pub async fn commit_answer(
        &self,
        query_id: Uuid,
        answer_text: &str,
        resolved_by: Option<&str>,
    ) -> Result<AnswerReceipt> {
        let text = answer_text.trim();
        if text.is_empty() {
            return Err(RelayError::Validation("missing field: answer_text".into()));
        }

        // Pre-read for the room_name denormalization; the transaction
        // re-reads and is the authority on existence.
        let query = self.get_query(query_id).await?;

        let embedding = self.embedder.embed(text).await?;
        if embedding.len() != self.embedder.dimension() {
            return Err(RelayError::Upstream(format!(
                "embedding dimension {} does not match configured {}",
                embedding.len(),
                self.embedder.dimension()
            )));
        }

        let now = Utc::now();
        let answer_id = Uuid::new_v4();
        let answer = Answer {
            id: answer_id,
            query_id,
            answer_text: text.to_string(),
            resolved_by: resolved_by.map(str::to_string),
            room_name: query.room_name.clone(),
            created_at: now,
            spoken: false,
            spoken_at: None,
        };
        let entry = IndexEntry {
            id: answer_id,
            query_id,
            answer_text: text.to_string(),
            embedding,
            embedding_model: self.embedder.model_id().to_string(),
            created_at: now,
        };

        let updated = self.ledger.commit_answer(&answer, &entry).await?;
        tracing::info!(query_id = %query_id, answer_id = %answer_id, "answer committed");
        Ok(AnswerReceipt {
            answer_id,
            query_id,
            status: updated.status,
        })
    }

    // ── Semantic retrieval ────────────────────────────────────

    /// Retrieval entry point consumed by the agent: embed the text and rank
    /// indexed answers. Upstream failures propagate; they are not an empty
    /// result.
    pub async fn search(&self, text: &str) -> Result<Vec<SearchMatch>> {
        let vector = self.embedder.embed(text).await?;
        self.index
            .search(&vector, self.config.top_k, self.config.min_similarity)
            .await
    }

    /// Search with a caller-supplied vector (the `/vector_search` surface).
    pub async fn search_vector(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchMatch>> {
        index::ensure_dimension(vector, self.embedder.dimension())?;
        self.index
            .search(vector, top_k, self.config.min_similarity)
            .await
    }

    // ── Escalation orchestrator ───────────────────────────────

    /// Single agent-facing entry point: try the knowledge base, escalate on
    /// a miss, and return the exact utterance the agent should speak.
    ///
    /// The decision is made once per call; delivery of the eventual human
    /// answer is entirely the notification bridge's job.
    pub async fn resolve(&self, query_text: &str, ctx: &ConversationContext) -> String {
        match self.search(query_text).await {
            Ok(matches) => {
                let texts: Vec<&str> = matches
                    .iter()
                    .map(|m| m.answer_text.trim())
                    .filter(|t| !t.is_empty())
                    .collect();
                if !texts.is_empty() {
                    let combined = texts.join("\n");
                    return index::truncate_chars(&combined, self.config.char_budget)
                        .to_string();
                }
            }
            Err(e) => {
                // Could-not-search is not found-nothing, but with the KB
                // unreachable the supervisor is still the right fallback.
                tracing::warn!(error = %e, "retrieval unavailable, escalating");
            }
        }

        let new = NewQuery {
            query: query_text.to_string(),
            user_id: ctx.user_id.clone(),
            room_name: ctx.room_name.clone(),
            job_id: ctx.job_id.clone(),
        };
        match self.create_query(new).await {
            Ok(_) => SUPERVISOR_ESCALATION_UTTERANCE.to_string(),
            Err(e) => {
                tracing::error!(error = %e, "escalation failed, no query persisted");
                ESCALATION_FAILURE_UTTERANCE.to_string()
            }
        }
    }
}

fn require_field(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RelayError::Validation(format!("missing field: {name}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FailingEmbedder, MemStore, StubEmbedder};
    use crate::types::QueryStatus;

    fn ctx() -> ConversationContext {
        ConversationContext {
            user_id: "user-1".into(),
            room_name: "room-a".into(),
            job_id: "job-1".into(),
        }
    }

    fn new_query() -> NewQuery {
        NewQuery {
            query: "What are your hours?".into(),
            user_id: "user-1".into(),
            room_name: "room-a".into(),
            job_id: "job-1".into(),
        }
    }

    fn service_with(store: Arc<MemStore>, embedder: Arc<dyn crate::ports::EmbeddingClient>) -> RelayService {
        RelayService::new(
            store.clone(),
            store.clone(),
            store,
            embedder,
            ServiceConfig::default(),
        )
    }

    fn service(store: Arc<MemStore>) -> RelayService {
        service_with(store, Arc::new(StubEmbedder::new(8)))
    }

    #[tokio::test]
    async fn create_query_persists_pending_query_and_timer() {
        let store = Arc::new(MemStore::new());
        let svc = service(store.clone());

        let q = svc.create_query(new_query()).await.unwrap();
        assert_eq!(q.status, QueryStatus::Pending);

        let stored = svc.get_query(q.id).await.unwrap();
        assert_eq!(stored.query, "What are your hours?");
        assert_eq!(store.timer_count().await, 1);
    }

    #[tokio::test]
    async fn create_query_rejects_missing_fields() {
        let svc = service(Arc::new(MemStore::new()));
        for (field, broken) in [
            ("query", NewQuery { query: " ".into(), ..new_query() }),
            ("user_id", NewQuery { user_id: "".into(), ..new_query() }),
            ("room_name", NewQuery { room_name: "".into(), ..new_query() }),
            ("job_id", NewQuery { job_id: "".into(), ..new_query() }),
        ] {
            let err = svc.create_query(broken).await.unwrap_err();
            match err {
                RelayError::Validation(msg) => assert!(msg.contains(field)),
                other => panic!("expected Validation, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn commit_answer_updates_query_answer_and_index_together() {
        let store = Arc::new(MemStore::new());
        let svc = service(store.clone());
        let q = svc.create_query(new_query()).await.unwrap();

        let receipt = svc
            .commit_answer(q.id, "9am to 7pm", Some("supervisor-1"))
            .await
            .unwrap();
        assert_eq!(receipt.status, QueryStatus::Answered);
        assert_eq!(receipt.query_id, q.id);

        // Referential invariant: exactly one answer and one index entry with
        // matching ids, and the query points at them.
        let updated = svc.get_query(q.id).await.unwrap();
        assert_eq!(updated.status, QueryStatus::Answered);
        assert_eq!(updated.answer_id, Some(receipt.answer_id));
        assert_eq!(updated.resolved_by.as_deref(), Some("supervisor-1"));
        assert!(updated.last_response_at.is_some());

        let answer = svc.get_answer(receipt.answer_id).await.unwrap();
        assert_eq!(answer.query_id, q.id);
        assert_eq!(answer.room_name, "room-a");
        assert!(!answer.spoken);

        assert_eq!(store.index_len().await, 1);
        let entry = store.index_entry(receipt.answer_id).await.unwrap();
        assert_eq!(entry.query_id, q.id);
        assert_eq!(entry.answer_text, "9am to 7pm");
    }

    #[tokio::test]
    async fn commit_answer_unknown_query_is_not_found() {
        let svc = service(Arc::new(MemStore::new()));
        let err = svc
            .commit_answer(Uuid::new_v4(), "text", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn commit_answer_twice_is_a_conflict() {
        let store = Arc::new(MemStore::new());
        let svc = service(store.clone());
        let q = svc.create_query(new_query()).await.unwrap();

        svc.commit_answer(q.id, "first", None).await.unwrap();
        let err = svc.commit_answer(q.id, "second", None).await.unwrap_err();
        assert!(matches!(err, RelayError::Conflict(_)));

        // Nothing from the losing commit leaked into the store.
        assert_eq!(store.index_len().await, 1);
        assert_eq!(svc.list_answers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_answer_embedding_failure_writes_nothing() {
        let store = Arc::new(MemStore::new());
        let svc = service_with(store.clone(), Arc::new(FailingEmbedder));
        let q = {
            // Use a working service to create the query first.
            let setup = service(store.clone());
            setup.create_query(new_query()).await.unwrap()
        };

        let err = svc.commit_answer(q.id, "text", None).await.unwrap_err();
        assert!(matches!(err, RelayError::Upstream(_)));
        assert_eq!(store.index_len().await, 0);
        assert!(svc.list_answers().await.unwrap().is_empty());
        assert_eq!(svc.get_query(q.id).await.unwrap().status, QueryStatus::Pending);
    }

    #[tokio::test]
    async fn commit_answer_rejects_empty_text() {
        let store = Arc::new(MemStore::new());
        let svc = service(store);
        let q = svc.create_query(new_query()).await.unwrap();
        let err = svc.commit_answer(q.id, "   ", None).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn commit_after_expiry_moves_to_answered() {
        // Policy choice, tested explicitly: a late human answer still settles
        // an unresolved query.
        let store = Arc::new(MemStore::new());
        let svc = service(store.clone());
        let q = svc.create_query(new_query()).await.unwrap();

        let outcome = store.force_unresolved(q.id).await;
        assert_eq!(outcome, crate::types::TransitionOutcome::Applied);

        let receipt = svc.commit_answer(q.id, "late answer", None).await.unwrap();
        assert_eq!(receipt.status, QueryStatus::Answered);
        let updated = svc.get_query(q.id).await.unwrap();
        assert_eq!(updated.status, QueryStatus::Answered);
        assert_eq!(updated.answer_id, Some(receipt.answer_id));
    }

    #[tokio::test]
    async fn search_on_empty_index_returns_empty_not_error() {
        let svc = service(Arc::new(MemStore::new()));
        let matches = svc.search("anything").await.unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn index_round_trip_returns_committed_answer_as_top_match() {
        let store = Arc::new(MemStore::new());
        let embedder = Arc::new(StubEmbedder::new(8));
        // The question and the stored answer embed to the same vector, the
        // decoy to an orthogonal one.
        embedder.set("9am to 7pm", vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        embedder.set("what are your hours", vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        embedder.set("we sell flowers", vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let svc = service_with(store.clone(), embedder);

        let q1 = svc.create_query(new_query()).await.unwrap();
        svc.commit_answer(q1.id, "9am to 7pm", None).await.unwrap();
        let q2 = svc
            .create_query(NewQuery { query: "flowers?".into(), ..new_query() })
            .await
            .unwrap();
        svc.commit_answer(q2.id, "we sell flowers", None).await.unwrap();

        let matches = svc.search("what are your hours").await.unwrap();
        assert_eq!(matches[0].answer_text, "9am to 7pm");
        assert!(matches[0].similarity > 0.99);
        // The orthogonal decoy sits below the similarity floor.
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn search_vector_rejects_wrong_dimension() {
        let svc = service(Arc::new(MemStore::new()));
        let err = svc.search_vector(&[1.0, 2.0], 3).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));
    }

    #[tokio::test]
    async fn resolve_hit_returns_kb_text_without_escalating() {
        let store = Arc::new(MemStore::new());
        let embedder = Arc::new(StubEmbedder::new(8));
        embedder.set("9am to 7pm", vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        embedder.set("hours", vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let svc = service_with(store.clone(), embedder);

        let q = svc.create_query(new_query()).await.unwrap();
        svc.commit_answer(q.id, "9am to 7pm", None).await.unwrap();
        let queries_before = svc.list_queries().await.unwrap().len();

        let utterance = svc.resolve("hours", &ctx()).await;
        assert_eq!(utterance, "9am to 7pm");
        assert_eq!(svc.list_queries().await.unwrap().len(), queries_before);
    }

    #[tokio::test]
    async fn resolve_miss_escalates_and_returns_supervisor_line() {
        let store = Arc::new(MemStore::new());
        let svc = service(store.clone());

        let utterance = svc.resolve("What are your hours?", &ctx()).await;
        assert_eq!(utterance, SUPERVISOR_ESCALATION_UTTERANCE);

        let queries = svc.list_queries().await.unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].status, QueryStatus::Pending);
        assert_eq!(queries[0].query, "What are your hours?");
    }

    #[tokio::test]
    async fn resolve_truncates_combined_text_to_char_budget() {
        let store = Arc::new(MemStore::new());
        let embedder = Arc::new(StubEmbedder::new(8));
        let long = "x".repeat(2000);
        embedder.set(&long, vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        embedder.set("hours", vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let svc = service_with(store.clone(), embedder);

        let q = svc.create_query(new_query()).await.unwrap();
        svc.commit_answer(q.id, &long, None).await.unwrap();

        let utterance = svc.resolve("hours", &ctx()).await;
        assert_eq!(utterance.chars().count(), 1000);
    }

    #[tokio::test]
    async fn resolve_create_failure_returns_generic_failure_line() {
        let store = Arc::new(MemStore::new());
        store.fail_next_create().await;
        let svc = service(store.clone());

        let utterance = svc.resolve("What are your hours?", &ctx()).await;
        assert_eq!(utterance, ESCALATION_FAILURE_UTTERANCE);
        assert!(svc.list_queries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_with_unreachable_embedder_still_escalates() {
        let store = Arc::new(MemStore::new());
        let svc = service_with(store.clone(), Arc::new(FailingEmbedder));

        // Embedding never succeeds, so commit can't be used here; resolve
        // must still persist a query and promise the supervisor.
        let utterance = svc.resolve("hours", &ctx()).await;
        assert_eq!(utterance, SUPERVISOR_ESCALATION_UTTERANCE);
        assert_eq!(svc.list_queries().await.unwrap().len(), 1);
    }
}
