mod commands;
mod config;
mod error;
mod events;
mod llm;
mod prompts;
mod session;
mod storage;
mod streaming;
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::llm::{ChatProvider, GeminiClient};
use crate::session::SessionStore;
use crate::storage::{FileStorage, MemoryStorage, SessionStorage};
use crate::ui::conversation::ConversationManager;

const LOG_ENV: &str = "CHATPANE_LOG";

#[derive(Parser)]
#[command(name = "chatpane")]
#[command(version)]
#[command(about = "Terminal chat client for Gemini with optional web search grounding", long_about = None)]
struct Cli {
    /// Enable web search grounding
    #[arg(long, global = true)]
    search: bool,

    /// Keep conversations in memory only
    #[arg(long, global = true)]
    no_persist: bool,

    /// Config file to use instead of ~/.chatpane/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored conversations
    List,
    /// Ask a single question and print the answer
    Ask {
        #[arg(required = true)]
        prompt: Vec<String>,
    },
    /// Delete a stored conversation
    Delete { id: String },
    /// Write a default config file
    Init,
}

fn init_logging(config: &Config) -> Result<()> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_path())
        .with_context(|| format!("Failed to open log file {}", config.log_path().display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn open_storage(cli: &Cli, config: &Config) -> Box<dyn SessionStorage> {
    if cli.no_persist {
        Box::new(MemoryStorage::new())
    } else {
        let storage = FileStorage::new(config.sessions_path());
        info!(path = %storage.path().display(), "persisting conversations");
        Box::new(storage)
    }
}

fn provider(config: &Config) -> Result<Arc<dyn ChatProvider>> {
    let client = GeminiClient::new(config).context("Failed to build HTTP client")?;
    info!(model = client.model(), "using provider");
    Ok(Arc::new(client))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Init)) {
        let path = cli.config.clone().unwrap_or_else(Config::default_path);
        return commands::init_config(&path, &mut std::io::stdout());
    }

    let config = Config::load(cli.config.as_deref())?;
    init_logging(&config)?;
    let use_search = cli.search || config.search_grounding;

    match &cli.command {
        None => {
            let store = SessionStore::load(open_storage(&cli, &config));
            let manager = ConversationManager::new(store, provider(&config)?, config.model.clone())
                .with_search_grounding(use_search)
                .with_history_mode(config.history_mode);
            ui::run(manager).await
        }
        Some(Commands::List) => {
            commands::list_conversations(open_storage(&cli, &config).as_ref(), &mut std::io::stdout())
        }
        Some(Commands::Ask { prompt }) => {
            let mut store = SessionStore::load(open_storage(&cli, &config));
            commands::ask(
                &mut store,
                provider(&config)?,
                &prompt.join(" "),
                use_search,
                config.history_mode,
                &mut std::io::stdout(),
            )
            .await
        }
        Some(Commands::Delete { id }) => {
            let mut store = SessionStore::load(open_storage(&cli, &config));
            commands::delete_conversation(&mut store, id, &mut std::io::stdout())
        }
        Some(Commands::Init) => Ok(()),
    }
}
