use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use carrel_core::{AttendanceStats, Booking, IssuedToken, Pagination, Principal};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bookings::{parse_status, ListParams};
use crate::error::AppError;
use crate::middleware::auth_middleware;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    /// Either the opaque token or the raw JSON it encodes.
    pub qr_data: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    booking_id: Uuid,
    #[serde(flatten)]
    token: IssuedToken,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    records: Vec<Booking>,
    statistics: AttendanceStats,
    pagination: Pagination,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/attendance/qr/{id}", post(issue_token))
        .route("/v1/attendance/check-in", post(check_in))
        .route("/v1/attendance/check-out", post(check_out))
        .route("/v1/attendance/history", get(history))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

async fn issue_token(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.engine.issue_token(id, &principal).await?;
    Ok(Json(TokenResponse { booking_id: id, token }))
}

async fn check_in(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.engine.check_in_with_token(&req.qr_data, &principal).await?))
}

async fn check_out(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .engine
        .check_out_with_token(&req.qr_data, &principal, req.notes)
        .await?;
    Ok(Json(booking))
}

async fn history(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<ListParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let status = parse_status(params.status.as_deref())?;
    let (page, statistics) = state
        .engine
        .attendance_history(&principal, status, params.page, params.limit)
        .await?;
    let pagination = page.pagination();
    Ok(Json(HistoryResponse {
        records: page.items,
        statistics,
        pagination,
    }))
}
