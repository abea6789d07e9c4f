//! NotificationBridge — delivers committed answers to the live conversation.
//!
//! A standing subscription per room: poll for answers that are not yet
//! spoken, hand the text to the speech sink, then set the delivery marker.
//! Ordering is speak-then-mark. A marker write that fails after successful
//! speech is logged and accepted ("spoken but unmarked" can re-deliver after
//! a restart); the reverse ("marked but never spoken") can never happen.
//! A process-local set of recently delivered answer ids is the secondary
//! guard against late or duplicate feed events.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ports::{DeliveryStore, SpeechSink};
use crate::types::Answer;

pub struct NotificationBridge {
    delivery: Arc<dyn DeliveryStore>,
    sink: Arc<dyn SpeechSink>,
    room_name: String,
    interval: Duration,
    delivered: Mutex<HashSet<Uuid>>,
}

impl NotificationBridge {
    pub fn new(
        delivery: Arc<dyn DeliveryStore>,
        sink: Arc<dyn SpeechSink>,
        room_name: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            delivery,
            sink,
            room_name: room_name.into(),
            interval,
            delivered: Mutex::new(HashSet::new()),
        }
    }

    /// Run the subscription loop for the lifetime of the conversation.
    /// Spawn via `tokio::spawn`; aborting the task is the unsubscribe.
    pub async fn run(&self) {
        tracing::info!(room = %self.room_name, "NotificationBridge started");
        loop {
            self.poll_once().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One observation of the change feed. Returns how many answers were
    /// spoken. Feed errors are logged and retried on the next poll; the
    /// undelivered query doubles as the resume cursor, so no events are lost
    /// across reconnects.
    pub async fn poll_once(&self) -> usize {
        let answers = match self.delivery.undelivered_answers(&self.room_name).await {
            Ok(answers) => answers,
            Err(e) => {
                tracing::warn!(room = %self.room_name, "answer feed poll failed: {e}");
                return 0;
            }
        };

        let mut spoken = 0;
        for answer in answers {
            if self.deliver(&answer).await {
                spoken += 1;
            }
        }
        spoken
    }

    /// Handle one feed event. Returns true iff the answer was spoken now.
    pub async fn deliver(&self, answer: &Answer) -> bool {
        let text = answer.answer_text.trim();
        if text.is_empty() {
            return false;
        }

        {
            let mut delivered = self.delivered.lock().await;
            if !delivered.insert(answer.id) {
                // Duplicate event for an answer this process already spoke.
                tracing::debug!(answer_id = %answer.id, "duplicate delivery event ignored");
                return false;
            }
        }

        if let Err(e) = self.sink.say(&answer.room_name, text).await {
            tracing::error!(answer_id = %answer.id, "speech delivery failed: {e}");
            // Not spoken: forget the id so a later poll retries.
            self.delivered.lock().await.remove(&answer.id);
            return false;
        }

        if let Err(e) = self.delivery.mark_spoken(answer.id, Utc::now()).await {
            // Non-fatal: the answer was spoken. The dedupe set suppresses
            // re-speech for the life of this process; a restart may redeliver.
            tracing::error!(answer_id = %answer.id, "failed to mark answer as spoken: {e}");
        }
        true
    }
}
