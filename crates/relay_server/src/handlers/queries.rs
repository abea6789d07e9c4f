//! Query ledger handlers.
//!
//! POST /queries       — escalate a question (201 with the created query)
//! GET  /queries       — bulk listing for operational visibility
//! GET  /queries/:id   — fetch one query (POST accepted for parity with the
//!                       original collaborator client)

use std::sync::Arc;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use relay_core::types::{NewQuery, Query};
use relay_core::RelayService;

use crate::error::AppError;

/// Fields arrive optional so a missing one maps to 400 via the service's
/// validation rather than a framework-level 422.
#[derive(Debug, Deserialize)]
pub struct CreateQueryRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub room_name: Option<String>,
}

pub async fn create_query(
    Extension(service): Extension<Arc<RelayService>>,
    Json(body): Json<CreateQueryRequest>,
) -> Result<impl IntoResponse, AppError> {
    let new = NewQuery {
        query: body.query.unwrap_or_default(),
        user_id: body.user_id.unwrap_or_default(),
        room_name: body.room_name.unwrap_or_default(),
        job_id: body.job_id.unwrap_or_default(),
    };
    let query = service.create_query(new).await?;
    Ok((StatusCode::CREATED, Json(query)))
}

pub async fn get_query(
    Extension(service): Extension<Arc<RelayService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Query>, AppError> {
    Ok(Json(service.get_query(id).await?))
}

pub async fn list_queries(
    Extension(service): Extension<Arc<RelayService>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let queries = service.list_queries().await?;
    Ok(Json(serde_json::json!({ "queries": queries })))
}
