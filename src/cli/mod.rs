use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use time::OffsetDateTime;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigLoader;
use crate::registry::NoteRegistry;
use crate::store::DiskStore;

pub mod commands;

use self::commands::{NewArgs, OverviewArgs, SaveArgs, ShowArgs, SubmitArgs};

#[derive(Parser, Debug)]
#[command(
    name = "daylog",
    version,
    about = "Timestamped journal engine with a cross-note overview"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config directory (takes precedence over DAYLOG_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over DAYLOG_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List every registered note (default)
    List,
    /// Print a note's entries and persistent text
    Show(ShowArgs),
    /// Create a new note
    New(NewArgs),
    /// Append an entry to a note
    Submit(SubmitArgs),
    /// Print the aggregated overview for a date window
    Overview(OverviewArgs),
    /// Save one note, or everything
    Save(SaveArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("DAYLOG_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("DAYLOG_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let store = DiskStore::new(loader.paths());
    let settings = loader.load_or_init(&store)?;

    let now = OffsetDateTime::now_utc();
    let mut registry = NoteRegistry::new(Box::new(store), settings, now);
    let report = registry.load_all_notes(now)?;
    for (id, error) in &report.failed {
        eprintln!("warning: note '{id}' could not be loaded: {error}");
    }
    registry.restore_previous_session()?;

    let command = cli.command.unwrap_or(Commands::List);
    match command {
        Commands::List => commands::list_notes(&registry),
        Commands::Show(args) => commands::show_note(&mut registry, args),
        Commands::New(args) => commands::new_note(&mut registry, args),
        Commands::Submit(args) => commands::submit_entry(&mut registry, args),
        Commands::Overview(args) => commands::show_overview(&mut registry, args),
        Commands::Save(args) => commands::save(&mut registry, args),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
