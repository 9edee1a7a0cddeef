//! Shelf CLI
//!
//! Command-line interface for Shelf - local-first tag and resource
//! management with optional background sync.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shelf_core::{Config, RecordStore};

mod commands;
mod output;

use commands::wipe::WipeTarget;
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "shelf")]
#[command(about = "Shelf - Local-first tag and resource management")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Manage resources
    Resource {
        #[command(subcommand)]
        command: ResourceCommands,
    },
    /// Show status (replica ID, pending changes, counts)
    Status,
    /// Sync with the configured remote
    Sync,
    /// Delete all tags and/or resources
    Wipe {
        /// What to delete
        #[arg(value_enum, default_value = "all")]
        target: WipeTarget,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Create a new tag
    #[command(alias = "create")]
    Add {
        /// Tag name
        name: String,
    },
    /// List all tags
    #[command(alias = "ls")]
    List,
    /// Rename a tag
    Rename {
        /// Tag name, ID, or ID prefix
        tag: String,
        /// New name
        new_name: String,
    },
    /// Delete a tag (detaches it from all resources)
    #[command(alias = "rm")]
    Delete {
        /// Tag name, ID, or ID prefix
        tag: String,
    },
}

#[derive(Subcommand)]
enum ResourceCommands {
    /// Create a new resource
    #[command(alias = "create")]
    Add {
        /// Resource title
        title: String,
        /// Body content
        #[arg(short, long)]
        content: Option<String>,
        /// Tags to attach (created if missing)
        #[arg(short, long)]
        tag: Vec<String>,
    },
    /// List resources
    #[command(alias = "ls")]
    List {
        /// Filter by tag
        #[arg(short, long)]
        tag: Option<String>,
        /// Only resources modified in the last 7 days
        #[arg(long)]
        recent: bool,
    },
    /// Show resource details
    Show {
        /// Resource ID (full UUID or prefix)
        id: String,
    },
    /// Edit a resource
    Edit {
        /// Resource ID (full UUID or prefix)
        id: String,
        /// New title
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// New content
        #[arg(short, long)]
        content: Option<String>,
        /// Replace the tag set (created if missing)
        #[arg(short, long)]
        tag: Option<Vec<String>>,
    },
    /// Delete a resource
    #[command(alias = "rm")]
    Delete {
        /// Resource ID (full UUID or prefix)
        id: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, remote_path, sync_enabled)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), &output);
    }

    let config = Config::load()?;
    let mut store = RecordStore::open(config)?;

    match cli.command {
        Commands::Tag { command } => handle_tag_command(command, &mut store, &output),
        Commands::Resource { command } => handle_resource_command(command, &mut store, &output),
        Commands::Status => commands::status::show(&store, &output),
        Commands::Sync => {
            commands::sync::sync(store, &output).await?;
            Ok(())
        }
        Commands::Wipe { target } => commands::wipe::wipe(&mut store, target, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_tag_command(
    command: TagCommands,
    store: &mut RecordStore,
    output: &Output,
) -> Result<()> {
    match command {
        TagCommands::Add { name } => commands::tag::add(store, name, output),
        TagCommands::List => commands::tag::list(store, output),
        TagCommands::Rename { tag, new_name } => {
            commands::tag::rename(store, tag, new_name, output)
        }
        TagCommands::Delete { tag } => commands::tag::delete(store, tag, output),
    }
}

fn handle_resource_command(
    command: ResourceCommands,
    store: &mut RecordStore,
    output: &Output,
) -> Result<()> {
    match command {
        ResourceCommands::Add {
            title,
            content,
            tag,
        } => commands::resource::add(store, title, content, tag, output),
        ResourceCommands::List { tag, recent } => {
            commands::resource::list(store, tag, recent, output)
        }
        ResourceCommands::Show { id } => commands::resource::show(store, id, output),
        ResourceCommands::Edit {
            id,
            title,
            content,
            tag,
        } => commands::resource::edit(store, id, title, content, tag, output),
        ResourceCommands::Delete { id } => commands::resource::delete(store, id, output),
    }
}

fn handle_config_command(command: Option<ConfigCommands>, output: &Output) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(output),
        Some(ConfigCommands::Set { key, value }) => commands::config::set(key, value, output),
    }
}
