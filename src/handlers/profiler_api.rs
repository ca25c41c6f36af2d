//! Profiler viewer API
//!
//! JSON endpoints for browsing recorded requests and their statements.
//! All of them sit under the default exclusion rules, so reading the
//! profiler's tables is never itself profiled.

use crate::error::AppError;
use crate::storage::{ClearStats, ProfilerDb, QueryRecord, RequestPage, RequestRecord};
use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared state for the viewer API
#[derive(Clone)]
pub struct ViewerState {
    pub db: Arc<ProfilerDb>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    15
}

#[derive(Debug, Serialize)]
pub struct RequestDetail {
    pub request: RequestRecord,
    /// Sum of the request's statement times in milliseconds
    pub query_time_total: f64,
}

#[derive(Debug, Serialize)]
pub struct RequestQueries {
    pub request: RequestRecord,
    pub queries: Vec<QueryRecord>,
    pub query_time_total: f64,
}

/// GET /all_request - Paginated request records, newest first
///
/// Example: GET /all_request?page=2&limit=15
pub async fn list_requests(
    State(state): State<ViewerState>,
    Query(params): Query<PageParams>,
) -> Result<Json<RequestPage>, AppError> {
    let page = state.db.list_requests(params.page, params.limit).await?;
    Ok(Json(page))
}

/// DELETE /all_request - Remove every request and query record
pub async fn clear_requests(State(state): State<ViewerState>) -> Result<Json<ClearStats>, AppError> {
    let cleared = state.db.clear_all().await?;
    Ok(Json(cleared))
}

/// GET /request_detail/{id}
pub async fn request_detail(
    State(state): State<ViewerState>,
    Path(id): Path<i64>,
) -> Result<Json<RequestDetail>, AppError> {
    let request = find_request(&state, id).await?;
    let query_time_total = state.db.query_time_total(id).await?;

    Ok(Json(RequestDetail {
        request,
        query_time_total,
    }))
}

/// GET /request_query/{id} - A request with all of its statements
pub async fn request_queries(
    State(state): State<ViewerState>,
    Path(id): Path<i64>,
) -> Result<Json<RequestQueries>, AppError> {
    let request = find_request(&state, id).await?;
    let queries = state.db.queries_for_request(id).await?;
    let query_time_total = queries.iter().map(|q| q.time_taken).sum();

    Ok(Json(RequestQueries {
        request,
        queries,
        query_time_total,
    }))
}

/// GET /request_query_details/{id} - One statement with its call stack
pub async fn query_detail(
    State(state): State<ViewerState>,
    Path(id): Path<i64>,
) -> Result<Json<QueryRecord>, AppError> {
    state
        .db
        .get_query(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("query {}", id)))
}

async fn find_request(state: &ViewerState, id: i64) -> Result<RequestRecord, AppError> {
    state
        .db
        .get_request(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("request {}", id)))
}
