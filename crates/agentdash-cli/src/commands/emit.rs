// Hook-side producer
//
// Reads the hook's JSON from stdin and posts it as one event. Failures are
// reported on stderr and swallowed; stdout stays empty because some agents
// feed hook stdout back into the conversation.

use crate::client::Client;
use crate::output::truncate;
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::IsTerminal;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Upper bound on waiting for stdin to close
const STDIN_TIMEOUT: Duration = Duration::from_secs(1);

const SUMMARY_MAX_CHARS: usize = 120;

#[derive(Debug, Args)]
pub struct EmitArgs {
    /// Producer identifier, e.g. "claude-code"
    #[arg(long, env = "AGENTDASH_APP")]
    pub app: String,

    /// Lifecycle point: UserPromptSubmit, PreToolUse, PostToolUse, Stop, or any custom name
    #[arg(long)]
    pub event_type: String,

    /// Session ID (defaults to `session_id` in the hook input)
    #[arg(long)]
    pub session_id: Option<String>,

    /// Summary (derived from the hook input when omitted)
    #[arg(long)]
    pub summary: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "2000")]
    pub timeout_ms: u64,
}

/// Body of POST /events
#[derive(Debug, Serialize, PartialEq)]
pub struct EmitRequest {
    pub app: String,
    pub session_id: String,
    pub event_type: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmitResponse {
    pub sequence: u64,
}

/// Post one event. Never fails: the exit status of a hook must not depend on the dashboard.
pub async fn run(api_url: &str, args: EmitArgs, quiet: bool) {
    let input = read_stdin().await;
    let timeout = Duration::from_millis(args.timeout_ms);

    let Some(request) = build_request(args, &input) else {
        if !quiet {
            eprintln!("agentdash: no session_id given or found in hook input, event dropped");
        }
        return;
    };

    let client = match Client::with_timeout(api_url, timeout) {
        Ok(client) => client,
        Err(e) => {
            if !quiet {
                eprintln!("agentdash: {e}");
            }
            return;
        }
    };

    match client.post::<EmitResponse, _>("/events", &request).await {
        Ok(response) => {
            if !quiet {
                eprintln!(
                    "agentdash: {} {}:{} #{}",
                    request.event_type, request.app, request.session_id, response.sequence
                );
            }
        }
        Err(e) => {
            if !quiet {
                eprintln!("agentdash: failed to emit {}: {e}", request.event_type);
            }
        }
    }
}

async fn read_stdin() -> String {
    // Interactive use: nothing is piped in
    if std::io::stdin().is_terminal() {
        return String::new();
    }
    let mut input = String::new();
    let mut stdin = tokio::io::stdin();
    let read = tokio::time::timeout(STDIN_TIMEOUT, stdin.read_to_string(&mut input));
    match read.await {
        Ok(Ok(_)) => input,
        Ok(Err(e)) => {
            eprintln!("agentdash: could not read stdin: {e}");
            String::new()
        }
        Err(_) => input,
    }
}

/// Assemble the event from arguments and hook input. `None` when no session id is known.
pub fn build_request(args: EmitArgs, input: &str) -> Option<EmitRequest> {
    let payload = parse_payload(input);
    let session_id = args
        .session_id
        .filter(|id| !id.trim().is_empty())
        .or_else(|| {
            payload
                .get("session_id")
                .and_then(Value::as_str)
                .filter(|id| !id.trim().is_empty())
                .map(String::from)
        })?;
    let summary = args.summary.or_else(|| summarize(&payload));

    Some(EmitRequest {
        app: args.app,
        session_id,
        event_type: args.event_type,
        payload,
        summary,
    })
}

/// Hook input as JSON. Non-JSON input is wrapped as `{"raw": text}`.
fn parse_payload(input: &str) -> Value {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| serde_json::json!({ "raw": trimmed }))
}

/// Best-effort one-line description of a hook payload.
pub fn summarize(payload: &Value) -> Option<String> {
    let text = |key: &str| payload.get(key).and_then(Value::as_str);

    let summary = if let Some(tool) = text("tool_name") {
        let input = payload.get("tool_input");
        let detail = ["command", "file_path", "pattern", "url", "description"]
            .iter()
            .find_map(|key| input.and_then(|i| i.get(*key)).and_then(Value::as_str));
        match detail {
            Some(detail) => format!("{tool}: {detail}"),
            None => tool.to_string(),
        }
    } else if let Some(prompt) = text("prompt") {
        prompt.to_string()
    } else {
        text("message")?.to_string()
    };

    let line = summary.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(truncate(&line, SUMMARY_MAX_CHARS))
}
