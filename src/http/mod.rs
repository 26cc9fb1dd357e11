//! HTTP control API the UI drives a room through
//!
//! - POST /rooms - Join a session's room
//! - GET /rooms/:code/state - Current sync state and prompts
//! - GET /rooms/:code/timeline - Per-prompt analysis summary
//! - POST /rooms/:code/{prompts,advance,retreat} - Prompt progression
//! - POST /rooms/:code/capture/{start,stop} - Capture windows
//! - POST /rooms/:code/response - Stage a free-text response
//! - POST /rooms/:code/media/:kind - Toggle a local track
//! - POST /rooms/:code/complete - Complete the session
//! - DELETE /rooms/:code - Leave the room
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, RoomClaim};
