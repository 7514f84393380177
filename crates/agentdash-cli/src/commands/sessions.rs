// Session inspection commands

use crate::client::{Client, ClientError};
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::{Deserialize, Serialize};

#[derive(Subcommand)]
pub enum SessionsCommand {
    /// List sessions, most recently active first
    List {
        /// Filter by status
        #[arg(long, value_parser = ["active", "stopped"])]
        status: Option<String>,
    },

    /// Get one session
    Get {
        /// Producer identifier
        app: String,

        /// Session ID within the app
        session_id: String,
    },
}

/// Session response from API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub app: String,
    pub session_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub event_count: u64,
    #[serde(default)]
    pub last_event_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

pub async fn run(command: SessionsCommand, client: &Client, output: OutputFormat) -> Result<()> {
    match command {
        SessionsCommand::List { status } => list(client, output, status).await,
        SessionsCommand::Get { app, session_id } => get(client, output, &app, &session_id).await,
    }
}

async fn list(client: &Client, output: OutputFormat, status: Option<String>) -> Result<()> {
    let query: Vec<(&str, String)> = status.into_iter().map(|s| ("status", s)).collect();
    let response: ListResponse<Session> = client.get_with_query("/sessions", &query).await?;

    if output.is_text() {
        if response.data.is_empty() {
            println!("No sessions found");
            return Ok(());
        }

        print_table_header(&[
            ("APP", 14),
            ("SESSION", 36),
            ("STATUS", 8),
            ("EVENTS", 6),
            ("LAST EVENT", 19),
        ]);

        for session in &response.data {
            let last = session.last_event_at.format("%Y-%m-%d %H:%M:%S").to_string();
            print_table_row(&[
                (&session.app, 14),
                (&session.session_id, 36),
                (&session.status, 8),
                (&session.event_count.to_string(), 6),
                (&last, 19),
            ]);
        }
    } else {
        output.print_value(&response)?;
    }

    Ok(())
}

async fn get(client: &Client, output: OutputFormat, app: &str, session_id: &str) -> Result<()> {
    let session: Session = client
        .get(&format!("/sessions/{}/{}", app, session_id))
        .await
        .map_err(|e| match e {
            ClientError::NotFound => anyhow::anyhow!("Session not found: {}:{}", app, session_id),
            e => e.into(),
        })?;

    if output.is_text() {
        print_field("App", &session.app);
        print_field("Session", &session.session_id);
        print_field("Status", &session.status);
        print_field("Events", &session.event_count.to_string());
        if let Some(last_type) = &session.last_event_type {
            print_field("Last event", last_type);
        }
        print_field("Started", &session.started_at.to_rfc3339());
        print_field("Last active", &session.last_event_at.to_rfc3339());
    } else {
        output.print_value(&session)?;
    }

    Ok(())
}
