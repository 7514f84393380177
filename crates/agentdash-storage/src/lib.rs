// Postgres storage layer with sqlx
//
// This crate provides database implementations for core traits:
// - Database: implements EventStore against PostgreSQL
// - StorageBackend: picks Postgres or the in-memory store at startup

pub mod backend;
pub mod models;
pub mod repositories;

pub use backend::StorageBackend;
pub use models::*;
pub use repositories::*;
