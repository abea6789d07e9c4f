//! relay_server — REST surface over [`relay_core::RelayService`].
//!
//! Route shapes follow the collaborator contract the voice agent already
//! speaks: `/queries`, `/answers`, `/vector_search`. The binary in `main.rs`
//! wires the Postgres stores and spawns the deadline scheduler.

pub mod error;
pub mod handlers;
pub mod router;
