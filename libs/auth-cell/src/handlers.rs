use std::sync::Arc;

use axum::{
    extract::{Extension, Json, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::{json, Value};
use tracing::debug;

use shared_models::auth::AuthContext;
use shared_models::error::AppError;
use shared_utils::extractor::authenticate;
use shared_utils::state::AppState;

use crate::models::{LoginChallenge, LoginRequest, RegisterRequest, UpdateProfileRequest, User, VerifyOtpRequest};
use crate::services::AccountService;

// Helper function to extract token
fn extract_bearer_token(headers: &HeaderMap) -> Result<String, AppError> {
    let auth_header = headers
        .get("Authorization")
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;

    let auth_value = auth_header
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    auth_value
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    // Argon2 hashing runs on the blocking pool.
    let service = AccountService::new(&state);
    let user = tokio::task::spawn_blocking(move || service.register(request))
        .await
        .map_err(|e| AppError::Internal(format!("registration did not finish: {}", e)))??;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginChallenge>, AppError> {
    debug!("Login requested for {}", request.email);
    let challenge = AccountService::new(&state).begin_login(request).await?;
    Ok(Json(challenge))
}

pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<Value>, AppError> {
    let (user, token) = AccountService::new(&state).verify_otp(request)?;
    Ok(Json(json!({
        "session": token,
        "user": user
    })))
}

pub async fn validate_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let token = extract_bearer_token(&headers)?;

    match authenticate(&state, &token) {
        Ok((_, claims)) => Ok(Json(json!({
            "valid": true,
            "user_id": claims.sub,
            "role": claims.role,
            "expires_at": claims.exp
        }))),
        Err(AppError::Auth(reason)) => {
            debug!("Session rejected: {}", reason);
            Ok(Json(json!({ "valid": false })))
        }
        Err(e) => Err(e),
    }
}

pub async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<User>, AppError> {
    Ok(Json(AccountService::new(&state).get_by_id(ctx.user_id)?))
}

pub async fn update_me(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<User>, AppError> {
    Ok(Json(AccountService::new(&state).update_profile(&ctx, request)?))
}

pub async fn deactivate_me(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<StatusCode, AppError> {
    AccountService::new(&state).disable(ctx.user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Value>, AppError> {
    AccountService::new(&state).logout(&ctx)?;
    Ok(Json(json!({ "message": "Logged out successfully" })))
}
