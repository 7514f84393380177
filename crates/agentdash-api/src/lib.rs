// Agentdash API Library
// Decision: Shared library for binaries (API server, OpenAPI export) and integration tests

// API routes and types (shared for OpenAPI generation)
pub mod api;

// Router assembly and shared pipeline state
pub mod app;
pub use app::{build_app, build_router_with_prefix, AppContext};

// Environment configuration
pub mod config;
pub use config::ServerConfig;

// Services layer
pub mod services;

// OpenAPI spec generation
pub mod openapi;
