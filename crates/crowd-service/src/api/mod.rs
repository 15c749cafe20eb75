pub mod live;
pub mod routes;

use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Largest accepted video upload.
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

fn cors_layer(origin: HeaderValue) -> CorsLayer {
    CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(origin)
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    let outputs = ServeDir::new(&state.config().output_dir);
    let cors = cors_layer(state.config().cors_origin.clone());

    Router::new()
        .route("/", get(routes::root))
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Analysis endpoints
        .route(
            "/analyze/",
            post(routes::analyze).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/ws/live_analysis", get(live::ws_handler))
        .nest_service("/outputs", outputs)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
