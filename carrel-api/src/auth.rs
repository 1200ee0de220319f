use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use carrel_core::user::{normalize_email, validate_password, NewUser, Role};
use carrel_core::User;
use carrel_shared::Masked;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::{auth_middleware, issue_token};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
    pub password: Masked<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Masked<String>,
    pub password: Masked<String>,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    token: String,
    user: User,
}

pub fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/v1/auth/me", get(me))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/v1/auth/register", post(register))
        .route("/v1/auth/login", post(login))
        .merge(protected)
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    validate_password(req.password.expose())?;

    let password = req.password.into_inner();
    let cost = state.auth.bcrypt_cost;
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .map_err(|e| AppError::InternalServerError(format!("Password hashing failed: {}", e)))?;

    let user = state
        .directory
        .register(NewUser {
            name: req.name,
            email: req.email,
            phone: req.phone,
            password_hash: Masked::new(hash),
            role: req.role.unwrap_or_default(),
        })
        .await?;

    let token = issue_token(&state.auth, &user, Utc::now())?;
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let invalid = || AppError::AuthenticationError("Invalid credentials".to_string());

    let email = normalize_email(req.email.expose()).map_err(|_| invalid())?;
    let user = state.directory.find_by_email(&email).await?.ok_or_else(invalid)?;

    if !user.is_active {
        return Err(AppError::AuthorizationError("Account is deactivated".to_string()));
    }

    let password = req.password.into_inner();
    let hash = user.password_hash.expose().clone();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .unwrap_or(false);
    if !verified {
        return Err(invalid());
    }

    tracing::info!(user_id = %user.id, "user logged in");
    let token = issue_token(&state.auth, &user, Utc::now())?;
    Ok(Json(AuthResponse { token, user }))
}

async fn me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}
