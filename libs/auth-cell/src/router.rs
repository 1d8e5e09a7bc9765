use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;
use shared_utils::state::AppState;

use crate::handlers;

pub fn auth_routes(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/verify", post(handlers::verify_otp))
        .route("/validate", post(handlers::validate_session));

    let protected_routes = Router::new()
        .route(
            "/me",
            get(handlers::get_me)
                .put(handlers::update_me)
                .delete(handlers::deactivate_me),
        )
        .route("/logout", post(handlers::logout))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
