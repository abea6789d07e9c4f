//! Answer handlers.
//!
//! POST /answers       — supervisor commits an answer (201 with the receipt,
//!                       404 unknown query, 409 already answered, 500 on
//!                       embedding/write failure)
//! GET  /answers       — bulk listing
//! GET  /answers/:id   — fetch one answer

use std::sync::Arc;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use relay_core::types::Answer;
use relay_core::{RelayError, RelayService};

use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct CommitAnswerRequest {
    #[serde(default)]
    pub query_id: Option<Uuid>,
    #[serde(default)]
    pub answer_text: Option<String>,
    #[serde(default)]
    pub resolved_by: Option<String>,
}

pub async fn commit_answer(
    Extension(service): Extension<Arc<RelayService>>,
    Json(body): Json<CommitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let query_id = body
        .query_id
        .ok_or_else(|| RelayError::Validation("missing field: query_id".into()))?;
    let answer_text = body.answer_text.unwrap_or_default();
    let receipt = service
        .commit_answer(query_id, &answer_text, body.resolved_by.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn get_answer(
    Extension(service): Extension<Arc<RelayService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Answer>, AppError> {
    Ok(Json(service.get_answer(id).await?))
}

pub async fn list_answers(
    Extension(service): Extension<Arc<RelayService>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let answers = service.list_answers().await?;
    Ok(Json(serde_json::json!({ "answers": answers })))
}
