use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use uuid::Uuid;

use shared_models::auth::AuthContext;
use shared_models::error::AppError;
use shared_utils::state::AppState;

use crate::models::{
    Appointment, AppointmentListQuery, BookAppointmentRequest, CancelAppointmentRequest, VideoSession,
};
use crate::services::BookingService;

pub async fn book_appointment(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    let appointment = BookingService::new(&state).book(&ctx, request.slot_id).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    Ok(Json(BookingService::new(&state).list_for(&ctx, query.status)?))
}

pub async fn get_appointment(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    Ok(Json(BookingService::new(&state).get(&ctx, appointment_id)?))
}

pub async fn confirm_appointment(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    Ok(Json(BookingService::new(&state).confirm(&ctx, appointment_id).await?))
}

/// The body is optional; an empty one cancels without a reason.
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(appointment_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<Appointment>, AppError> {
    let request = if body.is_empty() {
        CancelAppointmentRequest::default()
    } else {
        serde_json::from_slice::<CancelAppointmentRequest>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid cancel request: {}", e)))?
    };

    let appointment = BookingService::new(&state)
        .cancel(&ctx, appointment_id, request.reason)
        .await?;
    Ok(Json(appointment))
}

pub async fn complete_appointment(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    Ok(Json(BookingService::new(&state).complete(&ctx, appointment_id)?))
}

pub async fn get_video_session(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<VideoSession>, AppError> {
    Ok(Json(BookingService::new(&state).video_session(&ctx, appointment_id, Utc::now())?))
}
