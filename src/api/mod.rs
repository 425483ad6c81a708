//! HTTP API for HealthFinder.
//!
//! ## Endpoints
//!
//! - `POST /api/runs` - Submit a query, returns the run id (202)
//! - `GET /api/runs` - List known runs
//! - `GET /api/runs/:id` - Run status, turn history, result or error
//! - `POST /api/runs/:id/cancel` - Request cancellation
//! - `GET /api/runs/:id/stream` - Stream run events via SSE
//! - `POST /api/chat/completions` - Run a query to completion, OpenAI-style
//! - `GET /api/workflow` - Describe the default agent graph
//! - `GET /api/workflow/presets` - List workflow presets
//! - `GET /api/stats` - Run statistics
//! - `GET /api/health` - Health check

mod chat;
mod routes;
mod runs;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
