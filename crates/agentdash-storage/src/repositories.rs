// Repository layer for database operations
//
// Sequence allocation: each session has a counter row in `event_sessions`.
// Append bumps it with INSERT .. ON CONFLICT DO UPDATE .. RETURNING inside the
// same transaction that inserts the event, so the row lock serializes appends
// for one session only and a failed insert rolls the counter back.

use agentdash_core::{
    Event, EventQuery, EventStore, FilterOptions, NewEvent, SessionSummary, StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{EventRow, SessionRow};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply embedded migrations
    pub async fn migrate(&self) -> anyhow::Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }
}

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::unavailable(err.to_string())
}

fn to_i64(value: u64, what: &str) -> agentdash_core::Result<i64> {
    i64::try_from(value).map_err(|_| StoreError::unavailable(format!("{what} out of range")))
}

const EVENT_COLUMNS: &str =
    "position, id, app, session_id, sequence, event_type, payload, summary, received_at";

#[async_trait]
impl EventStore for Database {
    async fn append(&self, event: NewEvent, received_at: DateTime<Utc>) -> agentdash_core::Result<Event> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO event_sessions (app, session_id, last_sequence, started_at, last_event_at, last_event_type)
            VALUES ($1, $2, 1, $3, $3, $4)
            ON CONFLICT (app, session_id) DO UPDATE
            SET
                last_sequence = event_sessions.last_sequence + 1,
                last_event_at = GREATEST(event_sessions.last_event_at, EXCLUDED.last_event_at),
                last_event_type = EXCLUDED.last_event_type
            RETURNING last_sequence
            "#,
        )
        .bind(&event.app)
        .bind(&event.session_id)
        .bind(received_at)
        .bind(event.event_type.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(unavailable)?;

        let sequence = u64::try_from(sequence)
            .map_err(|_| StoreError::corrupt(format!("negative sequence {sequence}")))?;
        let stored = Event::from_new(event, sequence, received_at);

        sqlx::query(
            r#"
            INSERT INTO events (id, app, session_id, sequence, event_type, payload, summary, received_at)
            VALUES ($1, $2, $3, $4, $5, $6::json, $7, $8)
            "#,
        )
        .bind(stored.id)
        .bind(&stored.app)
        .bind(&stored.session_id)
        .bind(to_i64(stored.sequence, "sequence")?)
        .bind(stored.event_type.as_str())
        // Sent as text: a jsonb parameter would reject \u0000 before the json cast
        .bind(stored.payload.to_string())
        .bind(&stored.summary)
        .bind(stored.received_at)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        tx.commit().await.map_err(unavailable)?;

        tracing::debug!(
            app = %stored.app,
            session_id = %stored.session_id,
            sequence = stored.sequence,
            "event appended"
        );
        Ok(stored)
    }

    async fn query(&self, query: &EventQuery) -> agentdash_core::Result<Vec<Event>> {
        let since = query
            .since_sequence
            .map(|since| to_i64(since, "since_sequence"))
            .transpose()?;
        let limit = to_i64(query.limit as u64, "limit")?;

        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE ($1::text IS NULL OR app = $1)
              AND ($2::text IS NULL OR session_id = $2)
              AND ($3::bigint IS NULL OR sequence > $3)
            ORDER BY position ASC
            LIMIT $4
            "#
        ))
        .bind(query.app.as_deref())
        .bind(query.session_id.as_deref())
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn recent(&self, limit: usize) -> agentdash_core::Result<Vec<Event>> {
        let limit = to_i64(limit as u64, "limit")?;
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM (
                SELECT {EVENT_COLUMNS}
                FROM events
                ORDER BY position DESC
                LIMIT $1
            ) latest
            ORDER BY position ASC
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(Event::try_from).collect()
    }

    async fn sessions(&self) -> agentdash_core::Result<Vec<SessionSummary>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT app, session_id, last_sequence, started_at, last_event_at, last_event_type
            FROM event_sessions
            ORDER BY app, session_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.into_iter().map(SessionSummary::try_from).collect()
    }

    async fn filter_options(&self) -> agentdash_core::Result<FilterOptions> {
        let apps: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT app FROM event_sessions ORDER BY app")
                .fetch_all(&self.pool)
                .await
                .map_err(unavailable)?;
        let session_ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT session_id FROM event_sessions ORDER BY session_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        let event_types: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT event_type FROM events ORDER BY event_type")
                .fetch_all(&self.pool)
                .await
                .map_err(unavailable)?;

        Ok(FilterOptions {
            apps,
            session_ids,
            event_types,
        })
    }
}
