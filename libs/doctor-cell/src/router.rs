use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use shared_utils::extractor::auth_middleware;
use shared_utils::state::AppState;

use crate::handlers;

pub fn doctor_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/online", get(handlers::list_online_doctors))
        .route("/{doctor_id}/slots", get(handlers::list_open_slots))
        .route("/me/slots", get(handlers::list_own_slots).post(handlers::publish_slot))
        .route("/me/slots/{slot_id}", delete(handlers::delete_slot))
        .route("/me/status", put(handlers::set_online_status))
        .route("/me/status/toggle", post(handlers::toggle_online_status))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
