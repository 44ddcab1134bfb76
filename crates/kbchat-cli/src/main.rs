use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use clap::Parser;
use kbchat_core::services::EMPTY_INPUT_NOTICE;
use kbchat_core::{
    ClientSettings, ErrorCollectorLayer, ErrorLevel, ErrorStore, HttpAssistantService,
    JsonSettingsRepository, RequestController, SendOutcome, SettingsRepository,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod commands;

use commands::Command;

const ERROR_STORE_CAPACITY: usize = 200;

#[derive(Debug, Parser)]
#[command(name = "kbchat")]
#[command(about = "Chat with the knowledge-base assistant from a terminal", long_about = None)]
struct Cli {
    /// URL questions are POSTed to
    #[arg(long, env = "KBCHAT_ENDPOINT")]
    endpoint: Option<String>,

    /// User id sent with every request
    #[arg(long)]
    user_id: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Settings file [default: <config dir>/kbchat/settings.json]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    save_config: bool,
}

fn init_logging(errors: ErrorStore) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(ErrorCollectorLayer::new(errors))
        .try_init()
        .context("Failed to install tracing subscriber")
}

async fn load_settings(cli: &Cli) -> Result<ClientSettings> {
    let repository = match &cli.config {
        Some(path) => JsonSettingsRepository::with_path(path),
        None => JsonSettingsRepository::new()?,
    };

    let mut settings = repository.load().await.with_context(|| {
        format!(
            "Failed to load settings from {}",
            repository.path().display()
        )
    })?;

    if let Some(endpoint) = &cli.endpoint {
        settings.endpoint = endpoint.clone();
    }
    if let Some(user_id) = &cli.user_id {
        settings.user_id = user_id.clone();
    }
    if let Some(timeout_secs) = cli.timeout_secs {
        settings.request_timeout_secs = timeout_secs;
    }

    if cli.save_config {
        repository
            .save(settings.clone())
            .await
            .context("Failed to save settings")?;
        info!(path = %repository.path().display(), "Settings saved");
    }

    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let errors = ErrorStore::new(ERROR_STORE_CAPACITY);
    init_logging(errors.clone())?;

    let settings = load_settings(&cli).await?;
    let service =
        HttpAssistantService::from_settings(&settings).context("Failed to create HTTP client")?;
    info!(endpoint = %service.endpoint(), "Starting kbchat");

    let controller = RequestController::new(Arc::new(service), &settings);

    println!("kbchat: asking {}", settings.endpoint);
    println!("Type /help for commands.\n");
    print_last_message(&controller);

    run_repl(&controller, &errors).await?;

    let cancelled = controller.cancel_all();
    debug!(cancelled, "Shutting down");
    Ok(())
}

async fn run_repl(controller: &RequestController, errors: &ErrorStore) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("you> ");
        std::io::stdout().flush().context("Failed to write prompt")?;

        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line.context("Failed to read from stdin")?,
        };
        // EOF
        let Some(line) = line else {
            println!();
            break;
        };

        match commands::parse(&line) {
            Command::Quit => break,
            Command::Help => println!("{}", commands::HELP),
            Command::New => {
                let conversation = controller.create_conversation();
                println!("Started \"{}\".", conversation.title());
                print_last_message(controller);
            }
            Command::List => print_conversations(controller),
            Command::Switch(position) => switch_to(controller, position)?,
            Command::Errors => print_errors(errors),
            Command::Invalid(reason) => println!("{reason}"),
            Command::Message(text) => ask(controller, &text).await?,
        }
    }

    Ok(())
}

async fn ask(controller: &RequestController, text: &str) -> Result<()> {
    let conversation_id = controller.active_id();

    let send = controller.send(conversation_id, text);
    tokio::pin!(send);

    let outcome = loop {
        tokio::select! {
            outcome = &mut send => break outcome?,
            _ = tokio::signal::ctrl_c() => {
                if controller.cancel(conversation_id) {
                    println!("\nCancelling...");
                }
            }
        }
    };

    match outcome {
        SendOutcome::EmptyInput => println!("{EMPTY_INPUT_NOTICE}"),
        SendOutcome::AlreadySending => println!("Still waiting for the previous answer."),
        SendOutcome::Settled { reply, result } => {
            println!("assistant> {}", reply.text());
            if let Ok(answer) = &result {
                if let Some(backend) = &answer.backend {
                    println!("(backend = {backend}, {} sources)", answer.sources.len());
                }
            }
            println!();
        }
    }

    Ok(())
}

fn print_last_message(controller: &RequestController) {
    if let Some(message) = controller.active_conversation().last_message() {
        println!("{}> {}\n", message.role().label(), message.text());
    }
}

fn print_conversations(controller: &RequestController) {
    let active = controller.active_id();
    for (index, conversation) in controller.conversations().iter().enumerate() {
        let marker = if conversation.id() == active { '*' } else { ' ' };
        let sending = if controller.is_sending(conversation.id()) {
            " (waiting)"
        } else {
            ""
        };
        println!(
            "{marker} {:>2}. {} [{} messages]{sending}",
            index + 1,
            conversation.title(),
            conversation.message_count()
        );
    }
}

fn switch_to(controller: &RequestController, position: usize) -> Result<()> {
    let conversations = controller.conversations();
    let Some(conversation) = conversations.get(position - 1) else {
        println!(
            "No conversation {position}, there are {}.",
            conversations.len()
        );
        return Ok(());
    };

    controller.set_active(conversation.id())?;
    println!("Switched to \"{}\".", conversation.title());
    print_last_message(controller);
    Ok(())
}

fn print_errors(errors: &ErrorStore) {
    let entries = errors.get_all_entries();
    if entries.is_empty() {
        println!("No warnings or errors.");
        return;
    }

    for entry in entries {
        let level = match entry.level {
            ErrorLevel::Error => "ERROR",
            ErrorLevel::Warning => "WARN",
        };
        let age = SystemTime::now()
            .duration_since(entry.timestamp)
            .map(|age| age.as_secs())
            .unwrap_or_default();
        let conversation = entry
            .conversation_id()
            .map(|id| format!(" conversation={id}"))
            .unwrap_or_default();
        println!(
            "[{age}s ago] {level} {}: {}{conversation}",
            entry.target, entry.message
        );
    }
}
