use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use concierge_backend::conversation::TurnStatus;
use concierge_backend::core::config::AppPaths;
use concierge_backend::logging;
use concierge_backend::state::AppState;
use concierge_backend::tools::{
    run_stdio_server, CreateEventArgs, ListCalendarEventsArgs, ListRecentEmailsArgs,
    SendEmailArgs, ToolRuntime,
};

#[derive(Parser)]
#[command(name = "concierge", version)]
#[command(about = "USF campus concierge: grounded answers and workspace tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question and stream the grounded answer to stdout
    Ask {
        question: Vec<String>,
        /// Chat session to record the turn under (new one when omitted)
        #[arg(long, env = "CONCIERGE_SESSION_ID")]
        session: Option<String>,
        #[arg(long)]
        match_count: Option<u32>,
    },
    /// Run the MCP tool server on stdin/stdout
    ServeTools,
    /// List upcoming calendar events
    Calendar {
        #[arg(long, default_value_t = 5)]
        max_results: u32,
    },
    /// List recent mail, optionally filtered by a Gmail search query
    Emails {
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long, default_value_t = 5)]
        max_results: u32,
    },
    SendEmail {
        #[arg(long)]
        to: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
    },
    CreateEvent {
        #[arg(long)]
        summary: String,
        /// ISO-8601 start, with or without an offset
        #[arg(long)]
        start: String,
        #[arg(long, default_value_t = 30)]
        duration_minutes: u32,
        #[arg(long = "attendee")]
        attendees: Vec<String>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        location: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);
    let state = AppState::initialize(paths).await?;

    match cli.command {
        Commands::Ask {
            question,
            session,
            match_count,
        } => {
            let question = question.join(" ");
            let session_id = session.unwrap_or_else(|| Uuid::new_v4().to_string());
            let conversation = state.conversation(match_count);

            let mut stdout = std::io::stdout();
            let outcome = conversation
                .respond(&session_id, &question, |piece| {
                    let _ = stdout.write_all(piece.as_bytes());
                    let _ = stdout.flush();
                })
                .await?;
            println!();
            if outcome.status == TurnStatus::Failed {
                tracing::warn!(session_id = %session_id, "answer was replaced by the apology");
            }
        }
        Commands::ServeTools => {
            run_stdio_server(state.direct_tools.clone())
                .await
                .context("tool server stopped with an error")?;
        }
        Commands::Calendar { max_results } => {
            let events = state
                .tools
                .list_calendar_events(&ListCalendarEventsArgs { max_results })
                .await?;
            print_json(&events)?;
        }
        Commands::Emails { query, max_results } => {
            let messages = state
                .tools
                .list_recent_emails(&ListRecentEmailsArgs { query, max_results })
                .await?;
            print_json(&messages)?;
        }
        Commands::SendEmail { to, subject, body } => {
            let message_id = state
                .tools
                .send_email(&SendEmailArgs {
                    to_address: to,
                    subject,
                    body,
                })
                .await?;
            println!("{}", message_id);
        }
        Commands::CreateEvent {
            summary,
            start,
            duration_minutes,
            attendees,
            description,
            location,
        } => {
            let event_id = state
                .tools
                .create_event(&CreateEventArgs {
                    summary,
                    start_iso: start,
                    duration_minutes,
                    attendees,
                    description,
                    location,
                })
                .await?;
            println!("{}", event_id);
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
