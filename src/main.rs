use explore_assistant::config::{credential_key, ATTR_MODEL, SETTING_PROVIDER};
use explore_assistant::pipeline::TurnOutcome;
use explore_assistant::prompts::with_current_date;
use explore_assistant::session::MessageKind;
use explore_assistant::{
    AppConfig, CompletionService, EnvAttributes, LlmClient, LlmProvider, LlmSettings, LocalSettings, LookerClient,
    Orchestrator, SchemaDirectory, Session,
};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "explore-assistant")]
#[command(about = "Ask questions in plain language and get validated Looker explore queries")]
#[command(version)]
struct Args {
    /// Local settings file (default: ~/.explore-assistant/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// JSON file with few-shot generation and refinement examples
    #[arg(long, global = true)]
    examples: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the explores available to the current user
    Explores {
        /// Also load every schema and report which explores can be queried
        #[arg(long)]
        check: bool,
    },
    /// Run a single turn and print the resulting query
    Ask {
        /// The question in natural language
        question: String,

        /// Explore to query, as model:explore (default: first discovered)
        #[arg(short, long)]
        explore: Option<String>,
    },
    /// Interactive conversation; /new starts a thread, /explore <key> switches explore
    Chat {
        #[arg(short, long)]
        explore: Option<String>,
    },
    /// Send a prompt straight to the LLM, prefixed with the current date
    Raw { prompt: String },
    /// Store the LLM model and credential in the local settings file
    Settings {
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("explore_assistant=info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = match args.settings.clone().or_else(LocalSettings::default_path) {
        Some(path) => LocalSettings::load(path),
        None => LocalSettings::in_memory(),
    };

    match args.command {
        Commands::Explores { check } => list_explores(&settings, args.examples, check).await,
        Commands::Ask { question, explore } => {
            ask(&settings, args.examples, question, explore).await
        }
        Commands::Chat { explore } => chat(&settings, args.examples, explore).await,
        Commands::Raw { prompt } => raw(&settings, prompt).await,
        Commands::Settings { model, api_key } => update_settings(&mut settings, model, api_key),
    }
}

/// Wire the Looker client, schema directory and LLM client into an orchestrator.
fn build_orchestrator(settings: &LocalSettings, examples: Option<PathBuf>) -> Result<Orchestrator> {
    let config = AppConfig::load(settings, examples.as_deref())?;
    let looker = Arc::new(LookerClient::new(config.looker)?);
    let directory = Arc::new(SchemaDirectory::new(looker.clone()));
    let llm = Arc::new(LlmClient::new(&config.llm)?);
    let base_url = looker.base_url().to_string();

    Ok(Orchestrator::new(llm, looker, directory, config.examples).with_base_url(base_url))
}

/// Discover explores and apply an explicit explore choice.
async fn start_session(orchestrator: &Orchestrator, explore: Option<String>) -> Result<Session> {
    let mut session = Session::new();
    orchestrator
        .initialize(&mut session)
        .await
        .context("Failed to discover explores")?;
    if let Some(key) = explore {
        session.set_current_explore(&key)?;
        orchestrator.load_current(&session).await;
    }
    match session.current_explore() {
        Some(explore) => info!("Current explore: {}", explore.explore_key),
        None => warn!("No explores are available to this user"),
    }
    Ok(session)
}

async fn list_explores(
    settings: &LocalSettings,
    examples: Option<PathBuf>,
    check: bool,
) -> Result<()> {
    let orchestrator = build_orchestrator(settings, examples)?;
    let directory = orchestrator.directory();
    let explores = directory.discover_explores().await?;
    if explores.is_empty() {
        println!("No explores found.");
        return Ok(());
    }

    let loaded = if check {
        directory.load_all(&explores).await
    } else {
        Vec::new()
    };
    for explore in explores {
        if check {
            let status = if loaded.contains(&explore.explore_key) {
                "ok"
            } else {
                "unavailable"
            };
            println!("{:<50} {:<12} {}", explore.explore_key, status, explore.label);
        } else {
            println!("{:<50} {}", explore.explore_key, explore.label);
        }
    }
    Ok(())
}

async fn ask(
    settings: &LocalSettings,
    examples: Option<PathBuf>,
    question: String,
    explore: Option<String>,
) -> Result<()> {
    let orchestrator = build_orchestrator(settings, examples)?;
    let mut session = start_session(&orchestrator, explore).await?;
    let outcome = orchestrator.submit(&mut session, &question).await?;
    print_outcome(&outcome)?;
    Ok(())
}

async fn chat(settings: &LocalSettings, examples: Option<PathBuf>, explore: Option<String>) -> Result<()> {
    let orchestrator = build_orchestrator(settings, examples)?;
    let mut session = start_session(&orchestrator, explore).await?;

    println!("Type a question, /new for a new thread, /explore <model:explore> to switch, /quit to exit.");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!(
            "[{}]> ",
            session
                .current_explore()
                .map(|e| e.explore_key.as_str())
                .unwrap_or("-")
        );
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                session.new_thread();
                println!("Started a new thread.");
            }
            _ if line.starts_with("/explore") => {
                let key = line.trim_start_matches("/explore").trim();
                match session.set_current_explore(key) {
                    Ok(()) => {
                        if orchestrator.load_current(&session).await.is_none() {
                            println!("Switched to {}, but its fields could not be loaded.", key);
                        } else {
                            println!("Switched to {}.", key);
                        }
                    }
                    Err(e) => println!("{}", e),
                }
            }
            question => {
                let outcome = orchestrator.submit(&mut session, question).await?;
                print_outcome(&outcome)?;
            }
        }
    }
    Ok(())
}

async fn raw(settings: &LocalSettings, prompt: String) -> Result<()> {
    let llm_settings = LlmSettings::resolve(&EnvAttributes, settings);
    let client = LlmClient::new(&llm_settings)?;
    let wrapped = with_current_date(&prompt, &Utc::now());
    let response = client.complete(&wrapped).await?;
    println!("{}", response);
    Ok(())
}

fn update_settings(
    settings: &mut LocalSettings,
    model: Option<String>,
    api_key: Option<String>,
) -> Result<()> {
    if let Some(model) = model {
        let provider = LlmProvider::from_model(&model);
        settings.set(ATTR_MODEL, model.trim());
        settings.set(SETTING_PROVIDER, provider.as_str());
    }
    let resolved = LlmSettings::resolve(&EnvAttributes, settings);
    if let Some(api_key) = api_key {
        settings.set(&credential_key(resolved.provider), api_key.trim());
    }
    let resolved = LlmSettings::resolve(&EnvAttributes, settings);

    match settings.path() {
        Some(path) => println!("Settings: {}", path.display()),
        None => println!("Settings: in memory only"),
    }
    println!("Provider: {}", resolved.provider);
    println!("Model:    {}", resolved.model);
    println!(
        "API key:  {}",
        if resolved.has_credential() { "configured" } else { "missing" }
    );
    Ok(())
}

fn print_outcome(outcome: &TurnOutcome) -> Result<()> {
    if let Some(intent) = outcome.intent {
        info!("Intent: {}", intent);
    }
    for message in &outcome.messages {
        match &message.kind {
            MessageKind::Text { text } => println!("{}", text),
            MessageKind::Summary { summary, .. } => println!("{}", summary),
            MessageKind::Explore {
                summarized_prompt, ..
            } => println!("Query: {}", summarized_prompt),
        }
    }
    if let Some(params) = &outcome.explore_params {
        println!("{}", serde_json::to_string_pretty(params)?);
    }
    if let Some(url) = &outcome.explore_url {
        println!("{}", url);
    }
    Ok(())
}
