use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{error, info};

use super::super::AppState;
use crate::core::store::DEFAULT_PAGE_SIZE;

const DEFAULT_OUTPUT_LIMIT: usize = 200;
const MAX_OUTPUT_LIMIT: usize = 500;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Deserialize)]
pub struct ListQuery {
    page: Option<usize>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct CreateJobRequest {
    #[serde(default)]
    prompt: String,
}

#[derive(Deserialize)]
pub struct OutputQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

fn internal_error(context: &str, e: anyhow::Error) -> Response {
    error!("{}: {:#}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal error" })),
    )
        .into_response()
}

fn not_found(id: i64) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("request {id} not found") })),
    )
        .into_response()
}

pub async fn list_jobs(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let page = query.page.unwrap_or(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    match state.store.list_page(page, limit).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => internal_error("Listing requests failed", e),
    }
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(payload): Json<CreateJobRequest>,
) -> Response {
    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "prompt must not be empty" })),
        )
            .into_response();
    }
    match state.store.create_job(prompt).await {
        Ok(job) => {
            info!(job_id = job.id, "Queued request {}", job.id);
            (StatusCode::CREATED, Json(job)).into_response()
        }
        Err(e) => internal_error("Creating request failed", e),
    }
}

pub async fn get_job(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.store.get_job(id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => not_found(id),
        Err(e) => internal_error("Reading request failed", e),
    }
}

pub async fn get_job_output(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<OutputQuery>,
) -> Response {
    match state.store.get_job(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found(id),
        Err(e) => return internal_error("Reading request failed", e),
    }
    let limit = query
        .limit
        .unwrap_or(DEFAULT_OUTPUT_LIMIT)
        .clamp(1, MAX_OUTPUT_LIMIT);
    let offset = query.offset.unwrap_or(0);
    match state.store.get_output_lines(id, limit, offset).await {
        Ok((lines, total)) => {
            Json(serde_json::json!({ "lines": lines, "total": total })).into_response()
        }
        Err(e) => internal_error("Reading output failed", e),
    }
}

pub async fn get_processing(State(state): State<AppState>) -> Response {
    match state.store.get_processing_job().await {
        Ok(job) => Json(job).into_response(),
        Err(e) => internal_error("Reading processing request failed", e),
    }
}
