//! Escalation relay server binary.
//!
//! Wires the Postgres stores, the embedding client, and the deadline
//! scheduler into one axum process. Configuration is environment-only.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use relay_core::ports::{DeliveryStore, EmbeddingClient, LedgerStore, TimerStore, VectorIndexStore};
use relay_core::scheduler::DeadlineScheduler;
use relay_core::{RelayService, ServiceConfig};
use relay_embed::HttpEmbeddingClient;
use relay_postgres::PgStores;
use relay_server::router::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let database_url =
        std::env::var("RELAY_DATABASE_URL").context("RELAY_DATABASE_URL must be set")?;
    let bind_addr = env_or("RELAY_BIND_ADDR", "0.0.0.0:4400");
    let embed_endpoint = env_or(
        "RELAY_EMBED_ENDPOINT",
        "https://api.openai.com/v1/embeddings",
    );
    let embed_model = env_or("RELAY_EMBED_MODEL", relay_embed::DEFAULT_MODEL);
    let embed_dimension: usize = parse_env("RELAY_EMBED_DIM", relay_embed::DEFAULT_DIMENSION)?;
    let deadline_hours: i64 = parse_env("RELAY_DEADLINE_HOURS", 24)?;
    let scheduler_interval_ms: u64 = parse_env("RELAY_SCHEDULER_INTERVAL_MS", 1_000)?;
    let scheduler_batch: usize = parse_env("RELAY_SCHEDULER_BATCH", 100)?;
    let min_similarity: f32 = parse_env("RELAY_MIN_SIMILARITY", 0.60)?;

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&database_url)
        .await
        .context("connecting to postgres")?;
    let stores = PgStores::new(pool);

    let mut embedder = HttpEmbeddingClient::new(&embed_endpoint, &embed_model, embed_dimension);
    if let Ok(key) = std::env::var("RELAY_EMBED_API_KEY") {
        embedder = embedder.with_api_key(&key);
    }

    let ledger: Arc<dyn LedgerStore> = Arc::new(stores.ledger);
    let timers: Arc<dyn TimerStore> = Arc::new(stores.timers);
    let delivery: Arc<dyn DeliveryStore> = Arc::new(stores.delivery);
    let index: Arc<dyn VectorIndexStore> = Arc::new(stores.index);
    let embedder: Arc<dyn EmbeddingClient> = Arc::new(embedder);

    let config = ServiceConfig {
        deadline_window: chrono::Duration::hours(deadline_hours),
        min_similarity,
        ..ServiceConfig::default()
    };
    let service = Arc::new(RelayService::new(
        ledger.clone(),
        delivery,
        index,
        embedder,
        config,
    ));

    let scheduler = DeadlineScheduler::new(
        timers,
        ledger,
        Duration::from_millis(scheduler_interval_ms),
        scheduler_batch,
    );
    tokio::spawn(async move { scheduler.run().await });

    let addr: SocketAddr = bind_addr.parse().context("parsing RELAY_BIND_ADDR")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "escalation relay listening");

    axum::serve(listener, build_router(service))
        .await
        .context("server error")?;
    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("parsing {key}")),
        Err(_) => Ok(default),
    }
}
