#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::single_match_else,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use meetbook::booking::parse_utterance;
use meetbook::calendar::create_calendar_gateway;
use meetbook::routing::{
    create_router, ChatMessage, DirectBooking, InboundRequest, RequestRouter, RouteOutcome,
};
use meetbook::sessions::create_session_store;
use meetbook::Config;

/// `meetbook` - book meetings on a shared calendar by chatting.
#[derive(Parser, Debug)]
#[command(name = "meetbook")]
#[command(version)]
#[command(about = "Conversational meeting-booking assistant.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway (/chat, /book, /sessions, /health)
    #[command(long_about = "\
Start the HTTP gateway.

Serves the chat and direct booking endpoints. Bind address defaults \
to the values in your config file (gateway.host / gateway.port).

Examples:
  meetbook serve                  # use config defaults
  meetbook serve -p 8080          # listen on port 8080
  meetbook serve --host 0.0.0.0   # bind to all interfaces")]
    Serve {
        /// Port to listen on (0 picks a free port); defaults to config gateway.port
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to; defaults to config gateway.host
        #[arg(long)]
        host: Option<String>,
    },

    /// Book a meeting directly, with every field given
    Book {
        #[arg(long)]
        name: String,
        /// YYYY-MM-DD
        #[arg(long)]
        date: String,
        /// HH:MM, 24-hour
        #[arg(long)]
        time: String,
        /// Minutes
        #[arg(long, allow_hyphen_values = true)]
        duration: i64,
    },

    /// Show what the single-shot parser extracts from a sentence
    Parse {
        utterance: String,
    },

    /// Book through the step-by-step conversation in the terminal
    Chat {
        #[arg(long, default_value = "cli")]
        session: String,
    },

    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Parsing is pure; it needs neither config nor logging.
    if let Commands::Parse { utterance } = &cli.command {
        return run_parse(utterance);
    }

    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_dir = match &cli.config_dir {
        Some(dir) if dir.trim().is_empty() => bail!("--config-dir cannot be empty"),
        Some(dir) => Some(PathBuf::from(shellexpand::tilde(dir.trim()).into_owned())),
        None => None,
    };
    let mut config = Config::load_or_init(config_dir.as_deref()).await?;

    match cli.command {
        Commands::Parse { .. } => unreachable!(),

        Commands::Serve { port, host } => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            if let Some(host) = host {
                config.gateway.host = host;
            }
            config.validate()?;
            info!(
                "Starting meetbook gateway on {}:{}",
                config.gateway.host, config.gateway.port
            );
            meetbook::gateway::run_gateway(&config).await
        }

        Commands::Book {
            name,
            date,
            time,
            duration,
        } => {
            let router = build_router(&config)?;
            let outcome = router
                .route(InboundRequest::Book(DirectBooking {
                    name,
                    date,
                    time,
                    duration,
                }))
                .await;
            match outcome {
                RouteOutcome::Booked(created) => {
                    println!("{} Booked!", style("✔").green().bold());
                    if let Some(link) = created.link {
                        println!("  {link}");
                    }
                    Ok(())
                }
                other => bail!(failure_message(other)),
            }
        }

        Commands::Chat { session } => run_chat(&config, &session).await,

        Commands::Status => {
            print_status(&config);
            Ok(())
        }
    }
}

fn build_router(config: &Config) -> Result<Arc<dyn RequestRouter>> {
    let sessions = create_session_store(&config.sessions);
    let calendar = create_calendar_gateway(&config.calendar)?;
    Ok(create_router(sessions, calendar))
}

fn failure_message(outcome: RouteOutcome) -> String {
    match outcome {
        RouteOutcome::Rejected(message)
        | RouteOutcome::Unavailable(message)
        | RouteOutcome::Failed(message)
        | RouteOutcome::CalendarFailed { message, .. } => message,
        RouteOutcome::Reply(reply) => reply.response,
        RouteOutcome::Booked(_) => "booked".into(),
    }
}

fn run_parse(utterance: &str) -> Result<()> {
    match parse_utterance(utterance) {
        Ok(request) => {
            println!("{}", serde_json::to_string_pretty(&request)?);
            Ok(())
        }
        Err(error) => bail!("{error}\nTry: \"{}\"", meetbook::booking::EXAMPLE_UTTERANCE),
    }
}

async fn run_chat(config: &Config, session: &str) -> Result<()> {
    let router = build_router(config)?;
    println!(
        "{} Type your messages; {} or an empty line quits.",
        style("meetbook").cyan().bold(),
        style("exit").yellow()
    );

    loop {
        let input: String = dialoguer::Input::new()
            .with_prompt("you")
            .allow_empty(true)
            .interact_text()?;
        let input = input.trim();
        if input.is_empty() || input.eq_ignore_ascii_case("exit") {
            break;
        }

        let outcome = router
            .route(InboundRequest::Chat(ChatMessage {
                user_input: input.to_string(),
                session_id: session.to_string(),
            }))
            .await;
        match outcome {
            RouteOutcome::Reply(reply) => println!("{} {}", style("bot").green(), reply.response),
            other => println!("{} {}", style("bot").red(), failure_message(other)),
        }
    }
    Ok(())
}

fn print_status(config: &Config) {
    let credentials = config.calendar.resolved_credentials_path();
    println!("{}", style("meetbook status").bold());
    println!();
    println!("Version:      {}", env!("CARGO_PKG_VERSION"));
    println!("Config:       {}", config.config_path.display());
    println!(
        "Gateway:      {}:{}",
        config.gateway.host, config.gateway.port
    );
    println!();
    println!(
        "Calendar:     {}",
        config
            .calendar
            .calendar_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or("(not set)")
    );
    println!("Timezone:     {}", config.calendar.timezone);
    println!(
        "Credentials:  {} ({})",
        credentials.display(),
        if credentials.exists() { "found" } else { "missing" }
    );
    println!(
        "Retries:      {} (timeout {}s)",
        config.calendar.max_retries, config.calendar.timeout_secs
    );
    println!();
    println!(
        "Sessions:     ttl {}s, max {}",
        config.sessions.ttl_secs, config.sessions.max_sessions
    );
}
