//! HTTP API for the phone-facing controller
//!
//! Thin layer over the command channel and status store:
//! - POST /recording/start - Publish a start command
//! - POST /recording/stop - Publish a stop command
//! - GET /status - Current worker status plus staleness
//! - GET /events - Server-sent status and audio level events
//! - GET /recordings - List finished recordings
//! - DELETE /recordings/:name - Delete a recording
//! - GET /download/:name - Download a recording
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
