use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};

use shared_utils::extractor::auth_middleware;
use shared_utils::state::AppState;

use crate::handlers;

pub fn reminder_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::list_reminders).post(handlers::create_reminder))
        .route("/{reminder_id}", delete(handlers::delete_reminder))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
