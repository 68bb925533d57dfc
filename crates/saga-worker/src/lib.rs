//! saga-worker - the `saga` command line.
//!
//! Subcommands cover both sides of the memory: `worker` and `ingest` write
//! episodes, `recall`, `list` and `chat` read them back as a character would.
//! Machine-readable results go to stdout; logs go to stderr.

pub mod batch;
pub mod factory;
pub mod worker;

#[cfg(test)]
mod testing;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use saga_core::agent::RecallInput;
use saga_core::types::Message;
use saga_core::SagaConfig;

const DEFAULT_LOG_FILTER: &str = "info,saga=debug";

#[derive(Debug, Parser)]
#[command(name = "saga", version, about = "Episodic, access-scoped character memory")]
pub struct Args {
    /// Configuration file (.toml, .json or .yaml).
    #[arg(long, short = 'c', value_name = "FILE", env = "SAGA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Consume newline-delimited ingestion messages from stdin.
    Worker,
    /// Ingest `<N>.md` episode files from a directory.
    Ingest {
        #[arg(long, value_name = "DIR")]
        dir: PathBuf,
        /// Only this episode.
        #[arg(long)]
        episode: Option<u32>,
        #[arg(long)]
        story: Option<String>,
    },
    /// Recall memories as a character would.
    Recall {
        #[arg(long)]
        character: String,
        /// Episode the character is currently in.
        #[arg(long)]
        episode: u32,
        #[arg(long)]
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        story: Option<String>,
    },
    /// Dump stored facts up to and including an episode.
    List {
        #[arg(long)]
        episode: u32,
        /// Restrict to what this character may see.
        #[arg(long)]
        character: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        story: Option<String>,
    },
    /// Delete the records of one episode.
    Purge {
        #[arg(long)]
        episode_id: String,
        /// Only this version.
        #[arg(long)]
        version: Option<u32>,
        #[arg(long)]
        story: Option<String>,
    },
    /// Talk to a character. Reads turns from stdin unless `--message` is given.
    Chat {
        #[arg(long)]
        character: String,
        #[arg(long)]
        episode: u32,
        #[arg(long)]
        message: Option<String>,
        #[arg(long)]
        story: Option<String>,
    },
    /// List the configured characters.
    Characters,
}

/// Install the stderr subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Load configuration from `path`, or the default location when it exists,
/// then overlay the environment and validate.
pub fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SagaConfig> {
    let path = path
        .cloned()
        .or_else(|| SagaConfig::default_path().filter(|p| p.exists()));
    let mut config = match &path {
        Some(path) => SagaConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SagaConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    tracing::debug!(config = ?path, provider = ?config.vector_store.provider, "Configuration loaded");
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

pub async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = load_config(args.config.as_ref())?;
    let connector = factory::create_connector(&config)?;

    match args.command {
        Command::Worker => {
            let pipeline = factory::create_pipeline(&config, connector)?;
            let stdin = BufReader::new(tokio::io::stdin());
            let summary = worker::run_worker(&pipeline, stdin, tokio::io::stdout()).await?;
            if !summary.all_acked() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Ingest {
            dir,
            episode,
            story,
        } => {
            let pipeline = factory::create_pipeline(&config, connector)?;
            let mut stdout = std::io::stdout();
            batch::ingest_dir(&pipeline, &dir, episode, story.as_deref(), &mut stdout).await?;
        }
        Command::Recall {
            character,
            episode,
            query,
            top_k,
            story,
        } => {
            let engine = factory::create_engine(&config, connector)?;
            let agents = factory::create_agents(&config, engine)?;
            let agent = agents.create(&character, episode, story.as_deref())?;
            let mut input = RecallInput::new(query);
            input.top_k = top_k;
            print_json(&agent.recall(input).await?)?;
        }
        Command::List {
            episode,
            character,
            limit,
            story,
        } => {
            let engine = factory::create_engine(&config, connector)?;
            let memories = engine
                .memories_up_to(
                    story.as_deref(),
                    episode,
                    character.as_deref(),
                    limit.unwrap_or(config.retrieval.list_limit),
                )
                .await?;
            print_json(&memories)?;
        }
        Command::Purge {
            episode_id,
            version,
            story,
        } => {
            let pipeline = factory::create_pipeline(&config, connector)?;
            let removed = pipeline
                .purge_episode(story.as_deref(), &episode_id, version)
                .await?;
            print_json(&serde_json::json!({
                "episodeId": episode_id,
                "version": version,
                "removed": removed,
            }))?;
        }
        Command::Chat {
            character,
            episode,
            message,
            story,
        } => {
            let engine = factory::create_engine(&config, connector)?;
            let agents = factory::create_agents(&config, engine)?;
            match message {
                Some(message) => {
                    let response = agents
                        .talk_as_character(&character, episode, &message, story.as_deref())
                        .await?;
                    print_json(&response)?;
                }
                None => {
                    let agent = agents.create(&character, episode, story.as_deref())?;
                    chat_loop(&agent).await?;
                }
            }
        }
        Command::Characters => {
            let characters: Vec<_> = config.characters.iter().collect();
            print_json(&characters)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn chat_loop(agent: &saga_core::agent::CharacterAgent) -> anyhow::Result<()> {
    let name = agent.character().name.clone();
    let mut history: Vec<Message> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("you> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let reply = agent.respond(&history, line).await?;
        println!("{}> {}", name, reply.text);
        history.push(Message::user(line));
        history.push(Message::assistant(reply.text));
    }
    Ok(())
}
