use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use carrel_core::query::BookingQuery;
use carrel_core::{Booking, BookingStatus, Page, Pagination, Principal};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{admin_middleware, auth_middleware};
use crate::state::AppState;

const ADMIN_PAGE_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub seat_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct AdminListParams {
    pub status: Option<String>,
    pub seat: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct BookingListResponse {
    bookings: Vec<Booking>,
    pagination: Pagination,
}

impl From<Page<Booking>> for BookingListResponse {
    fn from(page: Page<Booking>) -> Self {
        let pagination = page.pagination();
        Self {
            bookings: page.items,
            pagination,
        }
    }
}

pub fn routes(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/v1/admin/bookings", get(list_all_bookings))
        .route_layer(middleware::from_fn(admin_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/mine", get(list_my_bookings))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", patch(cancel_booking))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
        .merge(admin)
}

pub(crate) fn parse_status(raw: Option<&str>) -> Result<Option<BookingStatus>, AppError> {
    raw.filter(|s| !s.is_empty())
        .map(str::parse::<BookingStatus>)
        .transpose()
        .map_err(AppError::from)
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let booking = state
        .engine
        .create_booking(&principal, req.seat_id, req.start_time, req.end_time, req.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn list_my_bookings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<ListParams>,
) -> Result<Json<BookingListResponse>, AppError> {
    let status = parse_status(params.status.as_deref())?;
    let page = state
        .engine
        .list_user_bookings(&principal, status, params.page, params.limit)
        .await?;
    Ok(Json(page.into()))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.engine.get_booking(id, &principal).await?))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.engine.cancel_booking(id, &principal).await?))
}

async fn list_all_bookings(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<AdminListParams>,
) -> Result<Json<BookingListResponse>, AppError> {
    let query = BookingQuery {
        status: parse_status(params.status.as_deref())?,
        seat_id: params.seat,
        date: params.date,
        limit: ADMIN_PAGE_LIMIT,
        ..Default::default()
    }
    .paged(params.page, params.limit);

    Ok(Json(state.engine.list_all_bookings(&principal, query).await?.into()))
}
