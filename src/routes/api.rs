use crate::{
    handlers::{diagnostics, health_check, ready_check},
    routes::auth_middleware::auth_middleware,
    state::AppState,
};
use axum::{middleware, routing::get, Router};

/// Create API routes
pub fn create_api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware)) // Applies to all routes added above
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
}
