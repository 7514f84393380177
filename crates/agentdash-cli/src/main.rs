// Agentdash CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json output formats for scripting.
// Design Decision: `emit` always exits 0 so a hook can never block its agent.

mod client;
mod commands;
mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agentdash")]
#[command(about = "Agentdash CLI - Emit agent hook events and inspect sessions")]
#[command(version)]
pub struct Cli {
    /// API base URL (include API_PREFIX if the server uses one)
    #[arg(
        long,
        env = "AGENTDASH_API_URL",
        default_value = "http://localhost:4000"
    )]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Forward a hook event read from stdin (for agent hook configuration)
    Emit(commands::emit::EmitArgs),

    /// Query stored events
    Events {
        #[command(subcommand)]
        command: commands::events::EventsCommand,
    },

    /// Inspect sessions
    Sessions {
        #[command(subcommand)]
        command: commands::sessions::SessionsCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let output_format = output::OutputFormat::parse(&cli.output);

    match cli.command {
        Commands::Emit(args) => {
            commands::emit::run(&cli.api_url, args, cli.quiet).await;
            Ok(())
        }
        Commands::Events { command } => {
            let client = client::Client::new(&cli.api_url);
            commands::events::run(command, &client, output_format).await
        }
        Commands::Sessions { command } => {
            let client = client::Client::new(&cli.api_url);
            commands::sessions::run(command, &client, output_format).await
        }
    }
}
