//! In-memory implementations of every port.
//!
//! One mutex around the whole state gives the same atomicity the Postgres
//! adapter gets from transactions: `create_query` and `commit_answer` are
//! all-or-nothing under the lock. Used by the test suite across all crates
//! and as a database-free dev harness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::index::rank_matches;
use crate::ports::{
    DeliveryStore, EmbeddingClient, LedgerStore, SpeechSink, TimerStore, VectorIndexStore,
};
use crate::types::{
    Answer, DeadlineTimer, IndexEntry, Query, QueryStatus, SearchMatch, TransitionOutcome,
};

#[derive(Default)]
struct MemState {
    queries: HashMap<Uuid, Query>,
    timers: HashMap<Uuid, DeadlineTimer>,
    answers: HashMap<Uuid, Answer>,
    index: Vec<IndexEntry>,
}

/// All four stores behind one lock.
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
    fail_next_create: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_query` fail with an upstream error, for
    /// exercising the orchestrator's failure utterance.
    pub async fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Test hook: move a query's deadline (and its timer) to `now + offset`.
    /// A negative offset makes the timer immediately due.
    pub async fn rewind_deadline(&self, id: Uuid, offset: chrono::Duration) {
        let mut state = self.state.lock().await;
        let fire_at = Utc::now() + offset;
        if let Some(q) = state.queries.get_mut(&id) {
            q.deadline = fire_at;
        }
        if let Some(t) = state.timers.get_mut(&id) {
            t.fire_at = fire_at;
        }
    }

    /// Test hook: expire a query regardless of its real deadline.
    pub async fn force_unresolved(&self, id: Uuid) -> TransitionOutcome {
        self.mark_unresolved(id, Utc::now())
            .await
            .expect("in-memory transition cannot fail")
    }

    /// Test hook: place an answer directly into the store, bypassing the
    /// commit transaction, to drive the bridge in isolation.
    pub async fn insert_answer_for_test(&self, answer: Answer) {
        self.state.lock().await.answers.insert(answer.id, answer);
    }

    pub async fn timer_count(&self) -> usize {
        self.state.lock().await.timers.len()
    }

    pub async fn index_len(&self) -> usize {
        self.state.lock().await.index.len()
    }

    pub async fn index_entry(&self, id: Uuid) -> Option<IndexEntry> {
        self.state
            .lock()
            .await
            .index
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }
}

#[async_trait]
impl LedgerStore for MemStore {
    async fn create_query(&self, query: &Query, timer: &DeadlineTimer) -> Result<()> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(RelayError::Upstream("store unavailable".into()));
        }
        let mut state = self.state.lock().await;
        state.queries.insert(query.id, query.clone());
        state.timers.insert(timer.query_id, timer.clone());
        Ok(())
    }

    async fn get_query(&self, id: Uuid) -> Result<Option<Query>> {
        Ok(self.state.lock().await.queries.get(&id).cloned())
    }

    async fn list_queries(&self) -> Result<Vec<Query>> {
        let state = self.state.lock().await;
        let mut queries: Vec<Query> = state.queries.values().cloned().collect();
        queries.sort_by_key(|q| q.created_at);
        Ok(queries)
    }

    async fn mark_unresolved(&self, id: Uuid, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        let mut state = self.state.lock().await;
        match state.queries.get_mut(&id) {
            Some(q) if q.status.is_pending() => {
                q.status = QueryStatus::Unresolved;
                q.updated_at = now;
                Ok(TransitionOutcome::Applied)
            }
            _ => Ok(TransitionOutcome::AlreadyTerminal),
        }
    }

    async fn commit_answer(&self, answer: &Answer, entry: &IndexEntry) -> Result<Query> {
        let mut state = self.state.lock().await;
        let query = state
            .queries
            .get(&answer.query_id)
            .cloned()
            .ok_or_else(|| RelayError::NotFound(format!("query {}", answer.query_id)))?;
        if query.answer_id.is_some() {
            return Err(RelayError::Conflict(format!(
                "query {} already answered",
                answer.query_id
            )));
        }

        // All three writes happen under the one lock, mirroring the single
        // transaction of the Postgres adapter.
        state.answers.insert(answer.id, answer.clone());
        state.index.push(entry.clone());
        let q = state
            .queries
            .get_mut(&answer.query_id)
            .expect("query checked above");
        q.status = QueryStatus::Answered;
        q.answer_id = Some(answer.id);
        q.updated_at = answer.created_at;
        q.last_response_at = Some(answer.created_at);
        if answer.resolved_by.is_some() {
            q.resolved_by = answer.resolved_by.clone();
        }
        Ok(q.clone())
    }
}

#[async_trait]
impl TimerStore for MemStore {
    async fn due_timers(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DeadlineTimer>> {
        let state = self.state.lock().await;
        let mut due: Vec<DeadlineTimer> = state
            .timers
            .values()
            .filter(|t| t.fire_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|t| t.fire_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn delete_timer(&self, query_id: Uuid) -> Result<()> {
        self.state.lock().await.timers.remove(&query_id);
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for MemStore {
    async fn get_answer(&self, id: Uuid) -> Result<Option<Answer>> {
        Ok(self.state.lock().await.answers.get(&id).cloned())
    }

    async fn list_answers(&self) -> Result<Vec<Answer>> {
        let state = self.state.lock().await;
        let mut answers: Vec<Answer> = state.answers.values().cloned().collect();
        answers.sort_by_key(|a| a.created_at);
        Ok(answers)
    }

    async fn undelivered_answers(&self, room_name: &str) -> Result<Vec<Answer>> {
        let state = self.state.lock().await;
        let mut answers: Vec<Answer> = state
            .answers
            .values()
            .filter(|a| a.room_name == room_name && !a.spoken)
            .cloned()
            .collect();
        answers.sort_by_key(|a| a.created_at);
        Ok(answers)
    }

    async fn mark_spoken(&self, answer_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let answer = state
            .answers
            .get_mut(&answer_id)
            .ok_or_else(|| RelayError::NotFound(format!("answer {answer_id}")))?;
        answer.spoken = true;
        answer.spoken_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl VectorIndexStore for MemStore {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchMatch>> {
        let state = self.state.lock().await;
        Ok(rank_matches(state.index.iter(), vector, top_k, min_similarity))
    }
}

// ── Test collaborators ────────────────────────────────────────

/// Deterministic embedding client. Texts registered via [`set`](Self::set)
/// return their fixed vector; everything else gets a hash-derived unit
/// vector, so unrelated texts are very unlikely to look similar.
pub struct StubEmbedder {
    dimension: usize,
    fixed: std::sync::Mutex<HashMap<String, Vec<f32>>>,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixed: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn set(&self, text: &str, vector: Vec<f32>) {
        self.fixed
            .lock()
            .expect("stub embedder lock poisoned")
            .insert(normalize(text), vector);
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        // FNV-1a over the text seeds a simple LCG; stable across runs.
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in text.as_bytes() {
            h ^= u64::from(*b);
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let mut v = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            h = h.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            v.push(((h >> 33) as f32 / (u32::MAX >> 1) as f32) - 1.0);
        }
        v
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

#[async_trait]
impl EmbeddingClient for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let fixed = self.fixed.lock().expect("stub embedder lock poisoned");
        if let Some(v) = fixed.get(&normalize(text)) {
            return Ok(v.clone());
        }
        Ok(self.hash_vector(&normalize(text)))
    }

    fn model_id(&self) -> &str {
        "stub-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedding client whose provider is always down.
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingClient for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RelayError::Upstream("embedding service unavailable".into()))
    }

    fn model_id(&self) -> &str {
        "failing-embedder"
    }

    fn dimension(&self) -> usize {
        8
    }
}

/// Speech sink that records every utterance.
#[derive(Default)]
pub struct RecordingSink {
    utterances: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spoken(&self) -> Vec<(String, String)> {
        self.utterances.lock().await.clone()
    }
}

#[async_trait]
impl SpeechSink for RecordingSink {
    async fn say(&self, room_name: &str, text: &str) -> Result<()> {
        self.utterances
            .lock()
            .await
            .push((room_name.to_string(), text.to_string()));
        Ok(())
    }
}

/// Speech sink whose room connection is gone.
pub struct FailingSink;

#[async_trait]
impl SpeechSink for FailingSink {
    async fn say(&self, _room_name: &str, _text: &str) -> Result<()> {
        Err(RelayError::Upstream("speech pipeline unavailable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending_query(room: &str) -> Query {
        Query::new("q?", "u1", room, "job-1", Duration::hours(24))
    }

    #[tokio::test]
    async fn mark_unresolved_is_a_noop_on_answered_queries() {
        let store = MemStore::new();
        let q = pending_query("room-a");
        store.create_query(&q, &q.timer()).await.unwrap();

        let answer = Answer {
            id: Uuid::new_v4(),
            query_id: q.id,
            answer_text: "a".into(),
            resolved_by: None,
            room_name: q.room_name.clone(),
            created_at: Utc::now(),
            spoken: false,
            spoken_at: None,
        };
        let entry = IndexEntry {
            id: answer.id,
            query_id: q.id,
            answer_text: "a".into(),
            embedding: vec![1.0, 0.0],
            embedding_model: "m".into(),
            created_at: answer.created_at,
        };
        store.commit_answer(&answer, &entry).await.unwrap();

        let outcome = store.mark_unresolved(q.id, Utc::now()).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::AlreadyTerminal);
        let stored = store.get_query(q.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueryStatus::Answered);
    }

    #[tokio::test]
    async fn mark_unresolved_unknown_id_is_already_terminal() {
        let store = MemStore::new();
        let outcome = store.mark_unresolved(Uuid::new_v4(), Utc::now()).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::AlreadyTerminal);
    }

    #[tokio::test]
    async fn due_timers_honors_cutoff_and_limit() {
        let store = MemStore::new();
        for i in 0..3 {
            let mut q = pending_query("room-a");
            q.deadline = Utc::now() - Duration::minutes(10 - i);
            store.create_query(&q, &q.timer()).await.unwrap();
        }
        let future = pending_query("room-a");
        store.create_query(&future, &future.timer()).await.unwrap();

        let due = store.due_timers(Utc::now(), 2).await.unwrap();
        assert_eq!(due.len(), 2);
        assert!(due[0].fire_at <= due[1].fire_at);

        let all_due = store.due_timers(Utc::now(), 10).await.unwrap();
        assert_eq!(all_due.len(), 3);
    }

    #[tokio::test]
    async fn undelivered_answers_filters_by_room_and_marker() {
        let store = MemStore::new();
        let mk = |room: &str, spoken: bool| Answer {
            id: Uuid::new_v4(),
            query_id: Uuid::new_v4(),
            answer_text: "a".into(),
            resolved_by: None,
            room_name: room.into(),
            created_at: Utc::now(),
            spoken,
            spoken_at: None,
        };
        let a1 = mk("room-a", false);
        let a2 = mk("room-a", true);
        let a3 = mk("room-b", false);
        {
            let mut state = store.state.lock().await;
            for a in [&a1, &a2, &a3] {
                state.answers.insert(a.id, a.clone());
            }
        }

        let pending = store.undelivered_answers("room-a").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a1.id);
    }

    #[tokio::test]
    async fn stub_embedder_is_deterministic() {
        let e = StubEmbedder::new(8);
        let a = e.embed("hello").await.unwrap();
        let b = e.embed("hello").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        let c = e.embed("goodbye").await.unwrap();
        assert_ne!(a, c);
    }
}
