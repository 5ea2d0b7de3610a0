//! tablemirror CLI - mirror remote tables into local CSV files.

mod commands;
mod config;
mod progress;
mod shutdown;

use clap::{Parser, Subcommand};
use console::Term;
use tracing_subscriber::EnvFilter;

use crate::commands::refresh::RefreshArgs;

#[derive(Parser)]
#[command(name = "tablemirror")]
#[command(version)]
#[command(about = "Incrementally mirror remote tables into local CSV files")]
#[command(
    long_about = "tablemirror mirrors Airtable table views into local CSV files. Later runs \
fetch only records modified since the previous run and merge them in, falling back to a \
full rebuild when that is not safe. Attachments are cached in a shared media directory \
and optionally pruned once every dataset is written."
)]
#[command(after_long_help = r#"EXAMPLES
    Refresh the default dataset and prune stale media:
        $ AIRTABLE_API_TOKEN=pat... tablemirror --prune-media

    Cache only images and PDFs, at most 200 new downloads:
        $ tablemirror refresh --cache-media-types image,pdf --max-downloads 200

    Force a full rebuild:
        $ tablemirror refresh --full

    Generate shell completions:
        $ tablemirror completions bash > ~/.local/share/bash-completion/completions/tablemirror

CONFIGURATION
    tablemirror reads configuration from:
      1. ~/.config/tablemirror/config.toml (or $XDG_CONFIG_HOME/tablemirror/config.toml)
      2. ./tablemirror.toml
      3. Environment variables (TABLEMIRROR_* prefix, nested keys with __)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    AIRTABLE_API_TOKEN            API token (required)
    AIRTABLE_BASE_ID              Base id
    AIRTABLE_TABLE_ID             Table of the default dataset
    AIRTABLE_VIEW_ID              View of the default dataset
    AIRTABLE_CACHE_MEDIA_TYPES    Attachment types to cache (image,pdf,file)
    TABLEMIRROR_MEDIA__DIR        Media cache directory
"#)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    refresh: RefreshArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh every configured dataset (the default)
    Refresh(RefreshArgs),
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Initialize tracing for non-TTY mode (structured logging)
    if !Term::stdout().is_term() {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("tablemirror=info,tablemirror_cli=info"),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Refresh(cli.refresh)) {
        Commands::Completions { shell } => {
            commands::meta::handle_completions(shell)?;
        }
        Commands::Refresh(args) => {
            let shutdown_flag = shutdown::setup_shutdown_handler();
            commands::refresh::handle_refresh(args, shutdown_flag).await?;
        }
    }

    Ok(())
}
