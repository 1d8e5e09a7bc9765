use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use appointment_cell::router::appointment_routes;
use auth_cell::router::auth_routes;
use doctor_cell::router::doctor_routes;
use reminder_cell::router::reminder_routes;
use shared_utils::state::AppState;
use symptom_checker_cell::router::symptom_routes;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Telemedicine API is running!" }))
        .route("/health", get(health))
        .nest("/auth", auth_routes(state.clone()))
        .nest("/doctors", doctor_routes(state.clone()))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/reminders", reminder_routes(state.clone()))
        .nest("/symptoms", symptom_routes(state))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
