//! # ragchat CLI
//!
//! Chat with locally served models, optionally grounded in uploaded
//! documents.
//!
//! ## Usage
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat upload <files…>` | Copy files into the upload directory |
//! | `ragchat documents` | Index the uploads and list their tools |
//! | `ragchat ask "<query>"` | Answer one question |
//! | `ragchat chat` | Interactive chat session |
//! | `ragchat models` | List selectable and served models |
//!
//! ## Examples
//!
//! ```bash
//! ragchat upload ~/reports/report.pdf ~/notes/plan.md
//! ragchat ask "What were the main risks?" --mode agent
//! ragchat chat --model phi3 --mode rag
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ragchat::config::{self, Config};
use ragchat::embedding::create_provider;
use ragchat::ingest::store_upload;
use ragchat::library::Library;
use ragchat::llm::OllamaChat;
use ragchat::orchestrator::{ChatMode, DeltaSink, Orchestrator, GREETING};
use ragchat::progress::{IndexProgressReporter, ProgressMode};
use ragchat::session::Session;

/// ragchat: local-first document chat over Ollama models.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Built-in defaults apply when the file does not exist.
#[derive(Parser)]
#[command(name = "ragchat", version, about = "Chat with local models over your documents")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    /// Indexing progress on stderr. Defaults to human when stderr is a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy files into the upload directory.
    ///
    /// A file with the same name is replaced.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Index every upload and list documents, chunk counts and tools.
    Documents,

    /// Answer a single question and exit.
    Ask {
        query: String,

        #[arg(long, value_enum, default_value_t = ChatMode::Direct)]
        mode: ChatMode,

        /// Model id; must be one of `llm.models`.
        #[arg(long)]
        model: Option<String>,
    },

    /// Interactive chat.
    ///
    /// Commands: `/model <id>`, `/mode <mode>`, `/history`, `/save <path>`,
    /// `/reload` (re-index uploads), `/quit`.
    Chat {
        #[arg(long, value_enum, default_value_t = ChatMode::Direct)]
        mode: ChatMode,

        #[arg(long)]
        model: Option<String>,
    },

    /// List configured models and the ones Ollama is serving.
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_or_default(&cli.config)?;
    init_logging(&config.logging.level);

    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Upload { files } => cmd_upload(&config, &files),
        Commands::Documents => cmd_documents(&config, progress.as_ref()).await,
        Commands::Ask { query, mode, model } => {
            cmd_ask(&config, progress.as_ref(), &query, mode, model).await
        }
        Commands::Chat { mode, model } => cmd_chat(&config, progress.as_ref(), mode, model).await,
        Commands::Models => cmd_models(&config).await,
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn cmd_upload(config: &Config, files: &[PathBuf]) -> Result<()> {
    for file in files {
        let stored = store_upload(&config.storage.upload_dir, file)?;
        info!(from = %file.display(), to = %stored.display(), "stored upload");
        println!("uploaded {}", stored.display());
    }
    Ok(())
}

async fn cmd_documents(config: &Config, progress: &dyn IndexProgressReporter) -> Result<()> {
    let embedder = create_provider(config)?;
    let library = Library::from_upload_dir(config, embedder, progress).await?;

    if library.documents().is_empty() {
        println!(
            "No documents indexed. Upload files into {}.",
            config.storage.upload_dir.display()
        );
    }
    for entry in library.documents() {
        println!(
            "{}  ({}, {} chunks)",
            entry.document.id, entry.document.content_type, entry.chunks
        );
        for tool in &entry.tools {
            println!("  {}", tool);
        }
    }
    for err in library.errors() {
        eprintln!("error: {}", err);
    }
    Ok(())
}

async fn cmd_ask(
    config: &Config,
    progress: &dyn IndexProgressReporter,
    query: &str,
    mode: ChatMode,
    model: Option<String>,
) -> Result<()> {
    let model = select_model(config, model)?;
    let orchestrator = build_orchestrator(config, progress, mode.uses_documents()).await?;

    let mut session = mode.start_session(model);
    let mut sink = TerminalSink::new();
    let reply = orchestrator
        .handle_turn(&mut session, query, mode, &mut sink)
        .await?;

    if sink.echo {
        println!("\n\nDuration: {:.2} seconds", reply.duration);
    } else {
        println!("{}", reply.text);
    }
    Ok(())
}

async fn cmd_chat(
    config: &Config,
    progress: &dyn IndexProgressReporter,
    mut mode: ChatMode,
    model: Option<String>,
) -> Result<()> {
    let model = select_model(config, model)?;
    let mut indexed = mode.uses_documents();
    let mut orchestrator = build_orchestrator(config, progress, indexed).await?;
    let mut session = mode.start_session(model);

    println!("{}", GREETING);
    println!("(model: {}, mode: {}; /quit to exit)", session.model(), mode);

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else { break };
        let line = line?;
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            let (name, arg) = command
                .split_once(char::is_whitespace)
                .map(|(n, a)| (n, a.trim()))
                .unwrap_or((command, ""));
            match name {
                "quit" | "exit" => break,
                "model" => match config.llm.validate_model(arg) {
                    Ok(()) => {
                        session.set_model(arg);
                        println!("model: {}", arg);
                    }
                    Err(e) => eprintln!("{}", e),
                },
                "mode" => match arg.parse::<ChatMode>() {
                    Ok(m) => {
                        if m.uses_documents() && !indexed {
                            orchestrator.set_library(Arc::new(load_library(config, progress).await));
                            indexed = true;
                        }
                        mode = m;
                        println!("mode: {}", mode);
                    }
                    Err(e) => eprintln!("{}", e),
                },
                "history" => print_history(&session),
                "save" if !arg.is_empty() => match session.save(Path::new(arg)) {
                    Ok(()) => println!("saved {}", arg),
                    Err(e) => eprintln!("{:#}", e),
                },
                "reload" => {
                    orchestrator.set_library(Arc::new(load_library(config, progress).await));
                    indexed = true;
                }
                _ => eprintln!("commands: /model <id>, /mode <mode>, /history, /save <path>, /reload, /quit"),
            }
            continue;
        }

        let mut sink = TerminalSink::new();
        match orchestrator
            .handle_turn(&mut session, input, mode, &mut sink)
            .await
        {
            Ok(reply) => {
                if sink.echo {
                    println!("\n\nDuration: {:.2} seconds", reply.duration);
                } else {
                    println!("{}", reply.text);
                }
            }
            Err(err) => {
                if sink.echo && sink.printed {
                    println!();
                }
                eprintln!("error: {}", err);
            }
        }
    }

    Ok(())
}

async fn cmd_models(config: &Config) -> Result<()> {
    let client = OllamaChat::new(&config.llm, config.llm.default_model.clone())?;
    let served = match client.list_models().await {
        Ok(models) => Some(models),
        Err(e) => {
            warn!(error = %e, "could not list served models");
            None
        }
    };

    for model in &config.llm.models {
        let marker = if *model == config.llm.default_model { "*" } else { " " };
        let status = match &served {
            Some(names) if names.iter().any(|n| n == model || n.starts_with(&format!("{}:", model))) => "served",
            Some(_) => "not pulled",
            None => "unknown",
        };
        println!("{} {:<12} {}", marker, model, status);
    }
    if served.is_none() {
        eprintln!("Ollama is not reachable at {}", client.url());
    }
    Ok(())
}

fn select_model(config: &Config, model: Option<String>) -> Result<String> {
    let model = model.unwrap_or_else(|| config.llm.default_model.clone());
    config.llm.validate_model(&model)?;
    Ok(model)
}

async fn build_orchestrator(
    config: &Config,
    progress: &dyn IndexProgressReporter,
    with_documents: bool,
) -> Result<Orchestrator> {
    let models = OllamaChat::new(&config.llm, config.llm.default_model.clone())
        .context("Failed to create Ollama client")?;
    let library = if with_documents {
        load_library(config, progress).await
    } else {
        Library::empty(create_provider(config)?)
    };
    Ok(Orchestrator::new(Arc::new(models), Arc::new(library), config))
}

/// Build the library, falling back to an empty one when indexing fails.
async fn load_library(config: &Config, progress: &dyn IndexProgressReporter) -> Library {
    let built = match create_provider(config) {
        Ok(embedder) => Library::from_upload_dir(config, embedder, progress).await,
        Err(e) => Err(e),
    };
    match built {
        Ok(library) => {
            for err in library.errors() {
                eprintln!("error: {}", err);
            }
            library
        }
        Err(e) => {
            eprintln!("error: failed to index documents: {:#}", e);
            Library::empty(Arc::new(ragchat::embedding::DisabledProvider))
        }
    }
}

fn print_history(session: &Session) {
    for turn in session.turns() {
        let marker = if turn.failed { " (failed)" } else { "" };
        println!("{}{}: {}", turn.role.label(), marker, turn.content);
    }
}

/// Echoes deltas to stdout as they stream when stdout is a terminal.
struct TerminalSink {
    echo: bool,
    printed: bool,
}

impl TerminalSink {
    fn new() -> Self {
        Self {
            echo: atty::is(atty::Stream::Stdout),
            printed: false,
        }
    }
}

impl DeltaSink for TerminalSink {
    fn on_delta(&mut self, delta: &str) {
        if self.echo {
            print!("{}", delta);
            let _ = std::io::stdout().flush();
            self.printed = true;
        }
    }
}
