// Storage backend abstraction
// Decision: Use enum dispatch for simplicity over trait objects
//
// StorageBackend works with either PostgreSQL (production) or the core
// in-memory store (dev mode, when DATABASE_URL is unset).

use agentdash_core::{
    Event, EventQuery, EventStore, FilterOptions, InMemoryEventStore, NewEvent, SessionSummary,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use crate::repositories::Database;

/// Storage backend that can be either PostgreSQL or in-memory
#[derive(Clone)]
pub enum StorageBackend {
    /// PostgreSQL database (production)
    Postgres(Database),
    /// In-memory store (dev mode)
    InMemory(Arc<InMemoryEventStore>),
}

impl StorageBackend {
    /// Connect to PostgreSQL and apply migrations
    pub async fn postgres(database_url: &str) -> anyhow::Result<Self> {
        let db = Database::from_url(database_url)
            .await
            .context("Failed to connect to database")?;
        db.migrate().await.context("Failed to run migrations")?;
        Ok(Self::Postgres(db))
    }

    /// Create an in-memory storage backend
    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryEventStore::new()))
    }

    /// Pick the backend from an optional database URL
    pub async fn from_database_url(database_url: Option<&str>) -> anyhow::Result<Self> {
        match database_url {
            Some(url) => Self::postgres(url).await,
            None => Ok(Self::in_memory()),
        }
    }

    /// Check if this is dev mode (in-memory)
    pub fn is_dev_mode(&self) -> bool {
        matches!(self, Self::InMemory(_))
    }

    /// Get the PostgreSQL pool if using PostgreSQL backend
    pub fn pool(&self) -> Option<&PgPool> {
        match self {
            Self::Postgres(db) => Some(db.pool()),
            Self::InMemory(_) => None,
        }
    }
}

#[async_trait]
impl EventStore for StorageBackend {
    async fn append(
        &self,
        event: NewEvent,
        received_at: DateTime<Utc>,
    ) -> agentdash_core::Result<Event> {
        match self {
            Self::Postgres(db) => db.append(event, received_at).await,
            Self::InMemory(store) => store.append(event, received_at).await,
        }
    }

    async fn query(&self, query: &EventQuery) -> agentdash_core::Result<Vec<Event>> {
        match self {
            Self::Postgres(db) => db.query(query).await,
            Self::InMemory(store) => store.query(query).await,
        }
    }

    async fn recent(&self, limit: usize) -> agentdash_core::Result<Vec<Event>> {
        match self {
            Self::Postgres(db) => db.recent(limit).await,
            Self::InMemory(store) => store.recent(limit).await,
        }
    }

    async fn sessions(&self) -> agentdash_core::Result<Vec<SessionSummary>> {
        match self {
            Self::Postgres(db) => db.sessions().await,
            Self::InMemory(store) => store.sessions().await,
        }
    }

    async fn filter_options(&self) -> agentdash_core::Result<FilterOptions> {
        match self {
            Self::Postgres(db) => db.filter_options().await,
            Self::InMemory(store) => store.filter_options().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdash_core::{EventType, SessionKey};
    use serde_json::json;

    #[tokio::test]
    async fn test_without_database_url_uses_memory() {
        let backend = StorageBackend::from_database_url(None).await.unwrap();
        assert!(backend.is_dev_mode());
        assert!(backend.pool().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_dispatch() {
        let backend = StorageBackend::in_memory();
        let event = backend
            .append(
                NewEvent {
                    app: "demo".to_string(),
                    session_id: "s1".to_string(),
                    event_type: EventType::UserPromptSubmit,
                    payload: json!({"prompt": "hi"}),
                    summary: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(event.sequence, 1);

        let events = backend
            .query(&EventQuery::session(&SessionKey::new("demo", "s1"), 0, 10))
            .await
            .unwrap();
        assert_eq!(events, vec![event]);
        assert_eq!(backend.sessions().await.unwrap().len(), 1);
    }
}
