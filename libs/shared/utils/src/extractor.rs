use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use shared_models::auth::{AuthContext, SessionClaims};
use shared_models::error::AppError;

use crate::jwt::validate_token;
use crate::state::AppState;

pub fn bearer_token(request: &Request<Body>) -> Result<&str, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;

    let auth_value = auth_header
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    auth_value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))
}

/// Validate `token` and check the session is still live: the account must
/// exist, be active, hold the token's role and not have signed out since
/// the token was issued.
pub fn authenticate(state: &AppState, token: &str) -> Result<(AuthContext, SessionClaims), AppError> {
    let claims = validate_token(token, &state.config.session_secret)
        .map_err(|e| AppError::Auth(e.to_string()))?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Auth("Invalid token subject".to_string()))?;

    ensure_live_session(state, user_id, &claims)?;
    Ok((AuthContext::new(user_id, claims.role), claims))
}

// Validates the session token and attaches the caller's AuthContext.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let (ctx, _) = authenticate(&state, bearer_token(&request)?)?;
    request.extensions_mut().insert(ctx);

    Ok(next.run(request).await)
}

fn ensure_live_session(state: &AppState, user_id: Uuid, claims: &SessionClaims) -> Result<(), AppError> {
    let row: Option<(String, bool, Option<i64>)> = state
        .db
        .with_conn(|conn| {
            conn.query_row(
                "SELECT role, is_active, sessions_revoked_at FROM users WHERE id = ?1",
                [user_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(shared_database::DatabaseError::from)
        })
        .map_err(|e| AppError::Database(e.to_string()))?;

    match row {
        Some((_, false, _)) => Err(AppError::Auth("Account is disabled".to_string())),
        Some((_, true, Some(revoked_at))) if claims.iat <= revoked_at => {
            Err(AppError::Auth("Session has been signed out".to_string()))
        }
        Some((stored_role, true, _)) if stored_role == claims.role.as_str() => Ok(()),
        _ => Err(AppError::Auth("Session no longer valid".to_string())),
    }
}
