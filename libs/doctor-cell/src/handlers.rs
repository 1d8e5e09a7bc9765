use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use auth_cell::models::DoctorSummary;
use shared_models::auth::AuthContext;
use shared_models::error::AppError;
use shared_utils::state::AppState;

use crate::models::{AvailabilitySlot, OnlineStatusRequest, PublishSlotRequest, SlotQuery, SlotRange};
use crate::services::AvailabilityService;

const DEFAULT_SLOT_LIMIT: usize = 50;
const MAX_SLOT_LIMIT: usize = 200;

pub async fn list_online_doctors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DoctorSummary>>, AppError> {
    Ok(Json(AvailabilityService::new(&state).list_online_doctors()?))
}

pub async fn list_open_slots(
    State(state): State<Arc<AppState>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<Value>, AppError> {
    let from = query.from.unwrap_or_else(Utc::now);
    let range = match query.to {
        Some(to) if to <= from => {
            return Err(AppError::BadRequest("'to' must be after 'from'".to_string()));
        }
        Some(to) => SlotRange::between(from, to),
        None => SlotRange::starting_at(from),
    };
    let limit = query.limit.unwrap_or(DEFAULT_SLOT_LIMIT).clamp(1, MAX_SLOT_LIMIT);

    let open_slots = AvailabilityService::new(&state).list_open_slots(doctor_id, range)?;
    let slots = open_slots
        .iter()
        .take(limit)
        .collect::<Result<Vec<AvailabilitySlot>, _>>()?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "slots": slots,
        "count": slots.len()
    })))
}

pub async fn list_own_slots(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<AvailabilitySlot>>, AppError> {
    Ok(Json(AvailabilityService::new(&state).list_own_slots(&ctx)?))
}

pub async fn publish_slot(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<PublishSlotRequest>,
) -> Result<(StatusCode, Json<AvailabilitySlot>), AppError> {
    let slot = AvailabilityService::new(&state).publish_slot(&ctx, request.start_time, request.end_time)?;
    Ok((StatusCode::CREATED, Json(slot)))
}

pub async fn delete_slot(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(slot_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    AvailabilityService::new(&state).delete_slot(&ctx, slot_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_online_status(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<OnlineStatusRequest>,
) -> Result<Json<DoctorSummary>, AppError> {
    Ok(Json(AvailabilityService::new(&state).set_online_status(&ctx, request.online)?))
}

pub async fn toggle_online_status(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<DoctorSummary>, AppError> {
    Ok(Json(AvailabilityService::new(&state).toggle_online_status(&ctx)?))
}
