//! mediadl CLI - offline downloads from a media server
//!
//! Queues items for download, runs the download scheduler and manages the
//! files it leaves behind.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// mediadl - offline media downloads
#[derive(Parser)]
#[command(name = "mediadl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for mediadl
    #[arg(long, env = "MEDIADL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue an item for download
    Add {
        /// Server base URL
        #[arg(long)]
        server_url: String,

        /// Access token for the server
        #[arg(long, env = "MEDIADL_API_KEY")]
        api_key: String,

        /// Item JSON as returned by the server
        #[arg(long, conflicts_with = "item_id")]
        item: Option<PathBuf>,

        /// Item ID, when no item JSON is given
        #[arg(long, requires = "server_id")]
        item_id: Option<String>,

        /// Server ID, when no item JSON is given
        #[arg(long)]
        server_id: Option<String>,

        /// Display name, when no item JSON is given
        #[arg(long)]
        name: Option<String>,

        /// File name reported by the server
        #[arg(short, long)]
        filename: Option<String>,

        /// Download URL, relative to the server URL
        #[arg(long)]
        download_url: Option<String>,
    },

    /// List downloads
    List {
        /// Filter by status
        #[arg(short, long)]
        status: Option<String>,

        /// Show all details
        #[arg(short, long)]
        all: bool,
    },

    /// Show download info
    Info {
        /// Download key ({serverId}_{itemId})
        key: String,
    },

    /// Download everything pending, then exit
    Run,

    /// Check that completed downloads are still on disk
    Check {
        /// Download key; all downloads when omitted
        key: Option<String>,
    },

    /// Print the file URI of a completed download and mark it played
    Play {
        /// Download key
        key: String,
    },

    /// Delete a download and its file
    Delete {
        /// Download key
        key: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Queue a failed download again
    Requeue {
        /// Download key
        key: String,
    },

    /// Import downloads saved by the previous app
    ImportLegacy {
        /// Path to the exported store JSON
        file: PathBuf,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Show the profile sent to the server when negotiating downloads
    Profile,

    /// Save a device profile (server JSON) for future runs
    ImportProfile {
        /// Path to the device profile JSON
        file: PathBuf,
    },

    /// Reset to defaults (the device id is kept)
    Reset,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        clap_complete::generate(shell, &mut Cli::command(), "mediadl", &mut std::io::stdout());
        return Ok(());
    }

    init_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(mediadl_core::default_data_dir);
    let core = mediadl_core::MediaDlCore::new(data_dir).await?;

    match cli.command {
        Commands::Add {
            server_url,
            api_key,
            item,
            item_id,
            server_id,
            name,
            filename,
            download_url,
        } => {
            let request = commands::AddRequest {
                server_url,
                api_key,
                item,
                item_id,
                server_id,
                name,
                filename,
                download_url,
            };
            commands::add_download(&core, request, cli.output).await?
        }

        Commands::List { status, all } => {
            commands::list_downloads(&core, status, all, cli.output).await?
        }

        Commands::Info { key } => commands::show_info(&core, &key, cli.output).await?,

        Commands::Run => commands::run_downloads(&core, cli.output).await?,

        Commands::Check { key } => commands::check_downloads(&core, key, cli.output).await?,

        Commands::Play { key } => commands::play_download(&core, &key, cli.output).await?,

        Commands::Delete { key, yes } => commands::delete_download(&core, &key, yes).await?,

        Commands::Requeue { key } => commands::requeue_download(&core, &key).await?,

        Commands::ImportLegacy { file } => commands::import_legacy(&core, file).await?,

        Commands::Config { action } => commands::config_action(&core, action, cli.output).await?,

        Commands::Completions { .. } => {}
    }

    Ok(())
}
