use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let downloads = ServeDir::new(state.storage.recordings_dir());

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Recording control
        .route("/recording/start", post(handlers::start_recording))
        .route("/recording/stop", post(handlers::stop_recording))
        // Worker status
        .route("/status", get(handlers::get_status))
        .route("/events", get(handlers::events))
        // Finished recordings
        .route("/recordings", get(handlers::list_recordings))
        .route("/recordings/:name", delete(handlers::delete_recording))
        .nest_service("/download", downloads)
        // The UI is served to phones on the local network
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
