//! HTTP API server for operational visibility and one-shot synthesis
//!
//! - GET / - Service banner
//! - GET /health - Broker and backend readiness
//! - POST /generate - Single-shot speech synthesis (bypasses the streams)
//! - GET /stats - Adapter counters and stream depths

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
