use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use carrel_core::{Principal, User};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::{AppState, AuthConfig};

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub exp: usize,
}

/// Signs an HS256 token for `user`. Expiry is checked against wall-clock time.
pub fn issue_token(auth: &AuthConfig, user: &User, now: chrono::DateTime<chrono::Utc>) -> Result<String, AppError> {
    let claims = Claims {
        sub: user.id.to_string(),
        email: user.email.expose().clone(),
        role: user.role.as_str().to_owned(),
        exp: (now + chrono::Duration::seconds(auth.expiration as i64)).timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(auth.secret.as_bytes()))
        .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))
}

fn decode_claims(auth: &AuthConfig, token: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::AuthenticationError("Invalid or expired token".to_string()))
}

// ============================================================================
// Authentication Middleware
// ============================================================================

/// Resolves the bearer token to a live account and injects `Principal` and
/// `User` into the request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Authorization(bearer) = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| AppError::AuthenticationError("Access denied. No token provided.".to_string()))?;

    let claims = decode_claims(&state.auth, bearer.token())?;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::AuthenticationError("Invalid or expired token".to_string()))?;

    let user = state
        .directory
        .find(user_id)
        .await?
        .ok_or_else(|| AppError::AuthenticationError("Token is no longer valid".to_string()))?;

    if !user.is_active {
        return Err(AppError::AuthenticationError("Account has been deactivated".to_string()));
    }

    let principal: Principal = user.principal();
    req.extensions_mut().insert(principal);
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

// ============================================================================
// Admin Guard (runs after auth_middleware)
// ============================================================================

pub async fn admin_middleware(req: Request, next: Next) -> Result<Response, AppError> {
    let is_admin = req
        .extensions()
        .get::<Principal>()
        .map(Principal::is_admin)
        .ok_or_else(|| AppError::AuthenticationError("Access denied. No token provided.".to_string()))?;

    if !is_admin {
        return Err(AppError::AuthorizationError("Admin role required".to_string()));
    }

    Ok(next.run(req).await)
}
