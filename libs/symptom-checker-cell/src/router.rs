use std::sync::Arc;

use axum::{middleware, routing::post, Router};

use shared_utils::extractor::auth_middleware;
use shared_utils::state::AppState;

use crate::handlers;

pub fn symptom_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/check", post(handlers::check_symptoms))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state)
}
