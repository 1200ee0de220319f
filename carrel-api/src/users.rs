use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, patch, put},
    Extension, Json, Router,
};
use carrel_core::user::Role;
use carrel_core::{Page, Pagination, Principal, ProfileUpdate, StatusChange, User, UserQuery};
use carrel_shared::Masked;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{admin_middleware, auth_middleware};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct ProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<Masked<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct UserListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    pub role: Option<String>,
    /// `active` or `inactive`.
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
struct UserListResponse {
    users: Vec<User>,
    pagination: Pagination,
}

impl From<Page<User>> for UserListResponse {
    fn from(page: Page<User>) -> Self {
        let pagination = page.pagination();
        Self {
            users: page.items,
            pagination,
        }
    }
}

#[derive(Debug, Serialize)]
struct AllUsersResponse {
    users: Vec<User>,
    count: usize,
}

pub fn routes(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/v1/users/all", get(all_users))
        .route("/v1/admin/users", get(list_users))
        .route("/v1/admin/users/{id}/status", patch(update_status))
        .route_layer(middleware::from_fn(admin_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/v1/users/profile", put(update_profile))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
        .merge(admin)
}

fn parse_activity(raw: Option<&str>) -> Result<Option<bool>, AppError> {
    match raw.filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some("active") => Ok(Some(true)),
        Some("inactive") => Ok(Some(false)),
        Some(other) => Err(AppError::ValidationError(format!("Invalid status: {}", other))),
    }
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<ProfileRequest>,
) -> Result<Json<User>, AppError> {
    let update = ProfileUpdate {
        name: req.name,
        phone: req.phone,
    };
    Ok(Json(state.directory.update_profile(&principal, update).await?))
}

async fn all_users(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<AllUsersResponse>, AppError> {
    let users = state.directory.all(&principal).await?;
    Ok(Json(AllUsersResponse {
        count: users.len(),
        users,
    }))
}

async fn list_users(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(params): Query<UserListParams>,
) -> Result<Json<UserListResponse>, AppError> {
    let query = UserQuery {
        search: params.search,
        role: params
            .role
            .filter(|r| !r.is_empty())
            .map(|r| r.parse::<Role>())
            .transpose()?,
        is_active: parse_activity(params.status.as_deref())?,
        ..Default::default()
    }
    .paged(params.page, params.limit);

    Ok(Json(state.directory.list(&principal, &query).await?.into()))
}

async fn update_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<Json<StatusChange>, AppError> {
    let active = body
        .get("isActive")
        .and_then(Value::as_bool)
        .ok_or_else(|| AppError::ValidationError("isActive must be a boolean".to_string()))?;

    Ok(Json(state.directory.set_active(&principal, id, active).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_filter_values() {
        assert_eq!(parse_activity(None).unwrap(), None);
        assert_eq!(parse_activity(Some("")).unwrap(), None);
        assert_eq!(parse_activity(Some("active")).unwrap(), Some(true));
        assert_eq!(parse_activity(Some("inactive")).unwrap(), Some(false));
        assert!(matches!(parse_activity(Some("banned")), Err(AppError::ValidationError(_))));
    }
}
