use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use shared_models::auth::AuthContext;
use shared_models::error::AppError;
use shared_utils::state::AppState;

use crate::models::{CreateReminderRequest, Reminder};
use crate::services::ReminderService;

pub async fn create_reminder(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<CreateReminderRequest>,
) -> Result<(StatusCode, Json<Reminder>), AppError> {
    let reminder = ReminderService::new(&state).create(&ctx, request)?;
    Ok((StatusCode::CREATED, Json(reminder)))
}

pub async fn list_reminders(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<Reminder>>, AppError> {
    Ok(Json(ReminderService::new(&state).list(&ctx)?))
}

pub async fn delete_reminder(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(reminder_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    ReminderService::new(&state).delete(&ctx, reminder_id)?;
    Ok(StatusCode::NO_CONTENT)
}
