use std::sync::Arc;

use axum::extract::{Extension, Json, State};

use shared_models::auth::AuthContext;
use shared_models::error::AppError;
use shared_utils::state::AppState;

use crate::models::{SymptomCheckRequest, SymptomCheckResponse};
use crate::services::SymptomCheckerService;

pub async fn check_symptoms(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<SymptomCheckRequest>,
) -> Result<Json<SymptomCheckResponse>, AppError> {
    let response = SymptomCheckerService::new(&state.config).check(&ctx, request).await?;
    Ok(Json(response))
}
