//! datum CLI
//!
//! Command-line interface for datum document control.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use datum_core::{Config, DocumentService, OnAmbiguous, QuickIdQuery, SqliteStore};

mod commands;
mod editor;
mod last_touched;
mod output;

use commands::document::AddArgs;
use last_touched::LastTouched;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "datum")]
#[command(about = "datum - documents for personal data tracking")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// What to do when a QuickId matches several documents
    /// (fail, first, last, all)
    #[arg(long, global = true, value_name = "POLICY")]
    on_ambiguous: Option<OnAmbiguous>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a document
    Add {
        /// JSON payload
        payload: String,
        /// Literal document id
        #[arg(long)]
        id: Option<String>,
        /// Id template part, e.g. %type% (repeatable, joined with the delimiter)
        #[arg(short = 'p', long = "id-part", value_name = "PART")]
        id_parts: Vec<String>,
        /// Store the payload as-is, without data/meta
        #[arg(long)]
        flat: bool,
        /// When the id exists: overwrite, delete or a merge strategy
        #[arg(long, value_name = "STRATEGY")]
        on_conflict: Option<String>,
    },
    /// Show documents
    #[command(alias = "show")]
    Get {
        /// QuickId (id, human id or prefix; comma-separated for several)
        query: String,
    },
    /// Merge a payload into documents
    Update {
        /// QuickId
        query: String,
        /// JSON payload
        payload: String,
        /// Merge strategy
        #[arg(short, long, default_value = "merge")]
        strategy: String,
        /// Treat the payload as flat
        #[arg(long)]
        flat: bool,
    },
    /// Replace the body of documents
    Overwrite {
        /// QuickId
        query: String,
        /// JSON payload
        payload: String,
        /// Treat the payload as flat
        #[arg(long)]
        flat: bool,
    },
    /// Edit a document in $EDITOR
    Edit {
        /// QuickId
        query: String,
    },
    /// Delete documents
    #[command(alias = "rm")]
    Delete {
        /// QuickId
        query: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Print the ids a QuickId resolves to
    Resolve {
        /// QuickId
        query: String,
    },
    /// Print the ids touched by the last write
    Last,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, id_delimiter, on_ambiguous)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Commands that don't need the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), &output);
    }

    let config = Config::load().context("Failed to load configuration")?;
    let last = Arc::new(LastTouched::new(config.last_touched_path()));

    if let Commands::Last = cli.command {
        return commands::document::last(&last, &output);
    }

    let store = SqliteStore::open(&config.sqlite_path()).with_context(|| {
        format!(
            "Failed to open document database {:?}",
            config.sqlite_path()
        )
    })?;
    let service = DocumentService::new(Arc::new(store))
        .with_delimiter(config.id_delimiter.clone())
        .with_on_ambiguous(cli.on_ambiguous.unwrap_or(config.on_ambiguous))
        .with_observer(last.clone());

    let parse_query = |raw: &str| -> Result<QuickIdQuery> {
        Ok(QuickIdQuery::parse(&last.expand(raw)?))
    };

    match cli.command {
        Commands::Add {
            payload,
            id,
            id_parts,
            flat,
            on_conflict,
        } => {
            let args = AddArgs {
                payload,
                id,
                id_parts,
                flat,
                on_conflict,
            };
            commands::document::add(&service, args, &output).await
        }
        Commands::Get { query } => {
            commands::document::get(&service, parse_query(&query)?, &output).await
        }
        Commands::Update {
            query,
            payload,
            strategy,
            flat,
        } => {
            commands::document::update(
                &service,
                parse_query(&query)?,
                payload,
                strategy,
                flat,
                &output,
            )
            .await
        }
        Commands::Overwrite {
            query,
            payload,
            flat,
        } => {
            commands::document::overwrite(&service, parse_query(&query)?, payload, flat, &output)
                .await
        }
        Commands::Edit { query } => {
            commands::document::edit(&service, parse_query(&query)?, &output).await
        }
        Commands::Delete { query, yes } => {
            commands::document::delete(&service, parse_query(&query)?, yes, &output).await
        }
        Commands::Resolve { query } => {
            commands::document::resolve(&service, parse_query(&query)?, &output).await
        }
        Commands::Last | Commands::Config { .. } => Ok(()), // Handled above
    }
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}

/// Log to stderr, filtered by DATUM_LOG (default: warn)
fn init_logging() {
    let env_filter =
        EnvFilter::try_from_env("DATUM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .with_writer(std::io::stderr)
        .try_init();
}
