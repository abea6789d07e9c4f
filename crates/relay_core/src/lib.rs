//! relay_core — domain logic for human-in-the-loop escalation and retrieval.
//!
//! An automated agent answers routine questions from a semantic knowledge
//! base. On a retrieval miss it escalates the raw question to a human
//! supervisor; the human's answer is committed atomically (ledger + retrieval
//! index) and pushed back to the still-live conversation, or the question
//! expires to `unresolved` after its deadline.
//!
//! This crate holds pure domain types, port traits, and the four core flows
//! (ledger state machine, answer committer, deadline scheduler, notification
//! bridge). Storage backends implement the ports; see `relay_postgres` for
//! the production adapter and [`memory`] for the in-process harness.

pub mod bridge;
pub mod error;
pub mod index;
pub mod memory;
pub mod ports;
pub mod scheduler;
pub mod service;
pub mod types;

pub use error::{RelayError, Result};
pub use service::{RelayService, ServiceConfig};
