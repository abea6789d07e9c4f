//! DeadlineScheduler — background task that expires overdue queries.
//!
//! Polls the timer store for due timers, applies the `pending → unresolved`
//! transition, then consumes the timer. The timer is only deleted after the
//! transition call returns, so a crash in between re-fires on the next poll:
//! at-least-once from the scheduler's perspective, exactly-once on the ledger
//! thanks to the pending-only guard. A race loss against the answer
//! committer (query already answered) is swallowed as a no-op, not an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::ports::{LedgerStore, TimerStore};
use crate::types::TransitionOutcome;

pub struct DeadlineScheduler {
    timers: Arc<dyn TimerStore>,
    ledger: Arc<dyn LedgerStore>,
    interval: Duration,
    batch_size: usize,
}

impl DeadlineScheduler {
    pub fn new(
        timers: Arc<dyn TimerStore>,
        ledger: Arc<dyn LedgerStore>,
        interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            timers,
            ledger,
            interval,
            batch_size,
        }
    }

    /// Run the scheduler loop. Never returns under normal operation; spawn
    /// it as a background task via `tokio::spawn`.
    pub async fn run(&self) {
        tracing::info!(
            "DeadlineScheduler started (poll interval={:?}, batch={})",
            self.interval,
            self.batch_size
        );
        loop {
            self.tick().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One poll: fire every due timer. Returns the number of queries that
    /// actually transitioned to unresolved.
    pub async fn tick(&self) -> usize {
        let now = Utc::now();
        let due = match self.timers.due_timers(now, self.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("Timer poll failed: {e}");
                return 0;
            }
        };

        let mut expired = 0;
        for timer in due {
            let query_id = timer.query_id;
            match self.ledger.mark_unresolved(query_id, now).await {
                Ok(TransitionOutcome::Applied) => {
                    tracing::info!(query_id = %query_id, "query expired to unresolved");
                    expired += 1;
                }
                Ok(TransitionOutcome::AlreadyTerminal) => {
                    // Lost the race to a commit; the timer is inert garbage.
                    tracing::debug!(query_id = %query_id, "expiry no-op, query already settled");
                }
                Err(e) => {
                    // Leave the timer in place; the next poll retries.
                    tracing::error!(query_id = %query_id, "expiry transition failed: {e}");
                    continue;
                }
            }
            if let Err(e) = self.timers.delete_timer(query_id).await {
                tracing::error!(query_id = %query_id, "failed to consume fired timer: {e}");
            }
        }
        expired
    }
}
