use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use carrel_core::{NewSeat, ReconcileReport, Seat, SeatFilter, SeatUpdate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{admin_middleware, auth_middleware};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct SeatListParams {
    pub floor: Option<i32>,
    pub section: Option<String>,
    pub available: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    #[serde(flatten)]
    seat: Seat,
    is_available: bool,
}

impl From<Seat> for SeatView {
    fn from(seat: Seat) -> Self {
        let is_available = seat.is_available();
        Self { seat, is_available }
    }
}

#[derive(Debug, Serialize)]
struct SeatListResponse {
    seats: Vec<SeatView>,
    count: usize,
}

pub fn routes(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/v1/admin/seats", get(list_all_seats).post(create_seat))
        .route("/v1/admin/seats/reconcile", post(reconcile_all))
        .route("/v1/admin/seats/{id}", put(update_seat).delete(delete_seat))
        .route("/v1/admin/seats/{id}/reconcile", post(reconcile_seat))
        .route_layer(middleware::from_fn(admin_middleware))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/v1/seats", get(list_seats))
        .route("/v1/seats/{id}", get(get_seat))
        .merge(admin)
}

fn list_response(seats: Vec<Seat>) -> Json<SeatListResponse> {
    let seats: Vec<SeatView> = seats.into_iter().map(SeatView::from).collect();
    Json(SeatListResponse {
        count: seats.len(),
        seats,
    })
}

async fn list_seats(
    State(state): State<AppState>,
    Query(params): Query<SeatListParams>,
) -> Result<Json<SeatListResponse>, AppError> {
    let filter = SeatFilter {
        floor: params.floor,
        section: params.section,
        available: params.available,
        include_inactive: false,
    };
    Ok(list_response(state.registry().list(&filter).await?))
}

async fn list_all_seats(
    State(state): State<AppState>,
    Query(params): Query<SeatListParams>,
) -> Result<Json<SeatListResponse>, AppError> {
    let filter = SeatFilter {
        floor: params.floor,
        section: params.section,
        available: params.available,
        include_inactive: true,
    };
    Ok(list_response(state.registry().list(&filter).await?))
}

async fn get_seat(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SeatView>, AppError> {
    Ok(Json(state.registry().get(id).await?.into()))
}

async fn create_seat(
    State(state): State<AppState>,
    Json(req): Json<NewSeat>,
) -> Result<(StatusCode, Json<SeatView>), AppError> {
    let seat = state.registry().create(req).await?;
    Ok((StatusCode::CREATED, Json(seat.into())))
}

async fn update_seat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SeatUpdate>,
) -> Result<Json<SeatView>, AppError> {
    Ok(Json(state.registry().update(id, req).await?.into()))
}

async fn delete_seat(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, AppError> {
    state.registry().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reconcile_seat(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SeatView>, AppError> {
    Ok(Json(state.registry().reconcile_occupancy(id).await?.into()))
}

async fn reconcile_all(State(state): State<AppState>) -> Result<Json<ReconcileReport>, AppError> {
    Ok(Json(state.registry().reconcile_all().await?))
}
