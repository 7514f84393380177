// HTTP API routes
//
// Each submodule handles one resource with its own AppState.

pub mod common;
pub mod events;
pub mod sessions;
pub mod stream;

// Re-export common types
pub use common::{ApiError, ErrorResponse, ListResponse};
