use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use log::info;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod cli;

use cli::Cli;
use cli::commands::{Commands, DocsCommands, RunArgs};
use selfloom::config::Config;
use selfloom::domain::{Document, ErrorKind, LoomEvent};
use selfloom::llm::{LlmClient, MockLlmClient, MockReply, OpenRouterClient};
use selfloom::loom::{EventSink, LoopController, StopReason};
use selfloom::server::{self, AppState, ClientFactory, FixedClient, OpenRouterFactory};
use selfloom::storage::{DocumentStore, FsDocumentStore};

const MOCK_NAMING_MODEL: &str = "mock/namer";

fn setup_logging(default_level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("selfloom")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("selfloom.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let env = env_logger::Env::default().default_filter_or(default_level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Offline client: fixed continuations, always picks the first, names the document
fn mock_client() -> Arc<dyn LlmClient> {
    Arc::new(
        MockLlmClient::new()
            .with_stream_default(MockReply::delayed(
                Duration::from_millis(150),
                MockReply::tokens([" and", " the", " tide", " kept", " rising."]),
            ))
            .with_complete_default(MockReply::text("1"))
            .with_model_reply(MOCK_NAMING_MODEL, MockReply::text("\"Offline Tide\"")),
    )
}

fn open_store(config: &Config) -> Result<Arc<FsDocumentStore>> {
    let store = FsDocumentStore::new(&config.storage.documents_dir).context(format!(
        "Failed to open document store at {}",
        config.storage.documents_dir.display()
    ))?;
    Ok(Arc::new(store))
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Serve { bind, port, mock } => handle_serve_command(bind.as_deref(), *port, *mock, config).await,
        Commands::Run(args) => handle_run_command(args, cli.is_verbose(), config).await,
        Commands::Docs { command } => handle_docs_command(command, config),
    }
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping");
            trigger.cancel();
        }
    });
    token
}

async fn handle_serve_command(bind: Option<&str>, port: Option<u16>, mock: bool, config: &Config) -> Result<()> {
    let mut config = config.clone();
    let bind = bind.unwrap_or(&config.server.bind).to_string();
    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .context(format!("Invalid bind address {}:{}", bind, port))?;

    let clients: Arc<dyn ClientFactory> = if mock {
        config.generation.naming_model = Some(MOCK_NAMING_MODEL.to_string());
        Arc::new(FixedClient(mock_client()))
    } else {
        Arc::new(OpenRouterFactory::new(
            config.provider.openrouter_config(),
            config.provider.api_key_env.clone(),
        ))
    };

    let store = open_store(&config)?;
    let state = AppState::new(config, store, clients);
    if !mock && !state.has_api_key() {
        println!(
            "{} no API token configured; POST /set_token before generating",
            "Warning:".yellow()
        );
    }

    println!("{} http://{}", "Listening on".green(), addr);
    server::serve(state, addr, shutdown_on_ctrl_c())
        .await
        .context("Server failed")?;
    Ok(())
}

async fn handle_run_command(args: &RunArgs, verbose: bool, config: &Config) -> Result<()> {
    let mut params = args.apply(config.generation_params());
    let client = if args.mock {
        params.naming_model = Some(MOCK_NAMING_MODEL.to_string());
        mock_client()
    } else {
        let api_key = config.provider.resolve_api_key().ok_or_else(|| {
            eyre!(
                "No API token configured: set provider.api_key or {}",
                config.provider.api_key_env
            )
        })?;
        let client = OpenRouterClient::with_api_key(api_key, config.provider.openrouter_config())
            .context("Failed to create OpenRouter client")?;
        Arc::new(client) as Arc<dyn LlmClient>
    };

    let store = open_store(config)?;
    let seed = args.seed.clone().unwrap_or_else(|| config.server.default_seed.clone());
    let document = match &args.document {
        Some(name) => match store.load(name)? {
            Some(text) => Document::new(name, text),
            None => Document::new(name, seed),
        },
        None => Document::untitled(seed),
    };

    let cancel = shutdown_on_ctrl_c();
    let (sink, mut rx) = EventSink::channel(config.server.event_buffer, cancel.clone());
    let mut controller = LoopController::new(client)
        .with_policy(config.backoff_policy())
        .with_store(store)
        .with_iteration_pause(config.server.iteration_pause());
    let run = tokio::spawn(async move { controller.run(document, params, sink, cancel).await });

    while let Some(event) = rx.recv().await {
        print_event(&event, verbose);
    }

    let report = run.await.context("Run task panicked")??;
    println!();
    let summary = format!(
        "{} after {} iteration(s), saved as {:?}",
        report.state, report.iterations, report.document.name
    );
    match report.reason {
        StopReason::Fatal(_) | StopReason::Degenerate => println!("{} {}", "Stopped:".red(), summary),
        StopReason::Cancelled | StopReason::IterationLimit => println!("{} {}", "Stopped:".green(), summary),
    }
    Ok(())
}

fn print_event(event: &LoomEvent, verbose: bool) {
    match event {
        LoomEvent::Init { text } => println!("{}", text.bold()),
        LoomEvent::IterationStart { iteration } => {
            println!("{}", format!("--- iteration {} ---", iteration).dimmed())
        }
        LoomEvent::CompletionToken { index, full_text } if verbose => {
            println!("{}", format!("  [{}] ... {}", index, full_text).dimmed())
        }
        LoomEvent::CompletionDone { index, text } => {
            println!("{}", format!("  [{}] {}", index, text.replace('\n', " ")).dimmed())
        }
        LoomEvent::GradingDone {
            chosen_index,
            chosen_text,
        } => println!("  {} {}", format!("[{}]", chosen_index).green(), chosen_text),
        LoomEvent::DocumentNamed { name } => println!("  {} {}", "Named:".cyan(), name),
        LoomEvent::Error { message, kind } => match kind {
            ErrorKind::Candidate => println!("  {} {}", "Candidate failed:".yellow(), message),
            ErrorKind::Auth | ErrorKind::Degenerate => println!("{} {}", "Error:".red(), message),
        },
        _ => {}
    }
}

fn handle_docs_command(command: &DocsCommands, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    match command {
        DocsCommands::List => {
            let docs = store.list()?;
            if docs.is_empty() {
                println!("{}", "No documents".dimmed());
            }
            for doc in docs {
                println!("{}  {}", doc.modified.format("%Y-%m-%d %H:%M").to_string().dimmed(), doc.name);
            }
        }
        DocsCommands::Show { name } => {
            let text = store.load(name)?.ok_or_else(|| eyre!("Document not found: {}", name))?;
            println!("{}", text);
        }
        DocsCommands::Delete { name } => {
            store.delete(name)?;
            println!("{} {}", "Deleted:".red(), name);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Setup logging once the configured level is known
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Loaded configuration");

    if let Err(e) = run_application(&cli, &config).await {
        log::error!("Application error: {}", e);
        return Err(e);
    }

    Ok(())
}
