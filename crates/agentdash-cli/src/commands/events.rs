// Event history commands

use crate::client::Client;
use crate::output::{print_table_header, print_table_row, OutputFormat};
use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum EventsCommand {
    /// List stored events in append order
    List {
        /// Only events from this app
        #[arg(long)]
        app: Option<String>,

        /// Only events from this session ID
        #[arg(long, short)]
        session: Option<String>,

        /// Only events after this sequence number
        #[arg(long)]
        since: Option<u64>,

        /// Maximum number of events
        #[arg(long, short, default_value = "100")]
        limit: usize,

        /// Keep paging until the session is exhausted (requires --app and --session)
        #[arg(long)]
        all: bool,
    },

    /// Latest events across all sessions
    Recent {
        /// Number of events
        #[arg(long, short, default_value = "20")]
        limit: usize,
    },

    /// Distinct apps, session IDs and event types
    Filters,
}

/// Event as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub app: String,
    pub session_id: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub summary: Option<String>,
    pub received_at: DateTime<Utc>,
    pub sequence: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct EventsPage {
    data: Vec<Event>,
    has_more: bool,
    #[serde(default)]
    next_since_sequence: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FilterOptions {
    apps: Vec<String>,
    session_ids: Vec<String>,
    event_types: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EventsQuery<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    app: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    since_sequence: Option<u64>,
    limit: usize,
}

pub async fn run(command: EventsCommand, client: &Client, output: OutputFormat) -> Result<()> {
    match command {
        EventsCommand::List {
            app,
            session,
            since,
            limit,
            all,
        } => list(client, output, app, session, since, limit, all).await,
        EventsCommand::Recent { limit } => recent(client, output, limit).await,
        EventsCommand::Filters => filters(client, output).await,
    }
}

async fn list(
    client: &Client,
    output: OutputFormat,
    app: Option<String>,
    session: Option<String>,
    since: Option<u64>,
    limit: usize,
    all: bool,
) -> Result<()> {
    if all && (app.is_none() || session.is_none()) {
        anyhow::bail!("--all requires both --app and --session");
    }

    let mut events = Vec::new();
    let mut since_sequence = since;
    loop {
        let query = EventsQuery {
            app: app.as_deref(),
            session_id: session.as_deref(),
            since_sequence,
            limit,
        };
        let page: EventsPage = client.get_with_query("/events", &query).await?;
        let done = !all || !page.has_more || page.next_since_sequence.is_none();
        since_sequence = page.next_since_sequence;
        events.extend(page.data);
        if done {
            break;
        }
    }

    print_events(output, &events)
}

async fn recent(client: &Client, output: OutputFormat, limit: usize) -> Result<()> {
    let response: ListResponse<Event> = client
        .get_with_query("/events/recent", &[("limit", limit)])
        .await?;
    print_events(output, &response.data)
}

async fn filters(client: &Client, output: OutputFormat) -> Result<()> {
    let options: FilterOptions = client.get("/events/filter-options").await?;

    if output.is_text() {
        println!("Apps:        {}", options.apps.join(", "));
        println!("Sessions:    {}", options.session_ids.join(", "));
        println!("Event types: {}", options.event_types.join(", "));
    } else {
        output.print_value(&options)?;
    }

    Ok(())
}

fn print_events(output: OutputFormat, events: &[Event]) -> Result<()> {
    if !output.is_text() {
        output.print_value(&events)?;
        return Ok(());
    }

    if events.is_empty() {
        println!("No events found");
        return Ok(());
    }

    print_table_header(&[
        ("SEQ", 5),
        ("APP", 14),
        ("SESSION", 20),
        ("TYPE", 18),
        ("RECEIVED", 19),
        ("SUMMARY", 40),
    ]);
    for event in events {
        let received = event.received_at.format("%Y-%m-%d %H:%M:%S").to_string();
        print_table_row(&[
            (&event.sequence.to_string(), 5),
            (&event.app, 14),
            (&event.session_id, 20),
            (&event.event_type, 18),
            (&received, 19),
            (event.summary.as_deref().unwrap_or("-"), 40),
        ]);
    }

    Ok(())
}
