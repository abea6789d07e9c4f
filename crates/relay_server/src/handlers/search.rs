//! POST /vector_search — similarity search with a caller-supplied vector.

use std::sync::Arc;

use axum::{Extension, Json};
use serde::Deserialize;

use relay_core::types::ANSWERS_INDEX_COLLECTION;
use relay_core::{RelayError, RelayService};

use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct VectorSearchRequest {
    #[serde(default)]
    pub query_vector: Vec<f32>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

pub async fn vector_search(
    Extension(service): Extension<Arc<RelayService>>,
    Json(body): Json<VectorSearchRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let collection = body.collection.unwrap_or_default();
    if collection.is_empty() {
        return Err(RelayError::Validation("missing field: collection".into()).into());
    }
    if collection != ANSWERS_INDEX_COLLECTION {
        return Err(RelayError::Validation(format!("unknown collection: {collection}")).into());
    }

    let top_k = body.top_k.unwrap_or(3);
    let matches = service.search_vector(&body.query_vector, top_k).await?;
    Ok(Json(serde_json::json!({ "matches": matches })))
}
