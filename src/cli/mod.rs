use std::env;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigLoader, CONFIG_ENV};
use crate::persist::{load_cards, store_from_config};

pub mod commands;

use self::commands::{DeleteArgs, EditArgs, LayoutArgs, NewArgs};

#[derive(Parser, Debug)]
#[command(
    name = "cardline",
    version,
    about = "Timeline and editor for a collection of cards"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over CARDLINE_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Card collection to open instead of the configured one
    #[arg(long)]
    pub cards: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch the interactive timeline (default)
    Tui,
    /// Print the timeline geometry of every card
    Layout(LayoutArgs),
    /// Create a card and store the updated collection
    New(NewArgs),
    /// Change fields of an existing card
    Edit(EditArgs),
    /// Delete a card
    Delete(DeleteArgs),
}

/// Where log lines go.
enum LogSink<'a> {
    Stderr,
    File(&'a Path),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    let command = cli.command.unwrap_or(Commands::Tui);

    let log_file = paths.log_dir.join("cardline.log");
    let sink = match command {
        Commands::Tui => LogSink::File(&log_file),
        _ => LogSink::Stderr,
    };
    init_tracing(&cli.log_level, sink)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;

    let mut config = loader.load_or_init()?;
    if let Some(cards) = cli.cards {
        config.cards_path = cards;
    }
    let cards = load_cards(&config.cards_path)?;
    let store = store_from_config(&config.persistence, &config.cards_path)?;
    let config = Arc::new(config);

    match command {
        Commands::Tui => commands::run_tui(config, cards, store),
        Commands::Layout(args) => {
            print!("{}", commands::render_layout(&cards, &args, &config.timeline)?);
            Ok(())
        }
        Commands::New(args) => {
            let outcome = commands::new_card(cards, store.as_ref(), &args)?;
            println!("Created card {}", outcome.id());
            Ok(())
        }
        Commands::Edit(args) => {
            let outcome = commands::edit_card(cards, store.as_ref(), &args)?;
            println!("{}", commands::describe_outcome(&outcome));
            Ok(())
        }
        Commands::Delete(args) => {
            let outcome = commands::delete_card(cards, store.as_ref(), &args)?;
            println!("Deleted card {}", outcome.id());
            Ok(())
        }
    }
}

fn init_tracing(level: &str, sink: LogSink<'_>) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        match sink {
            LogSink::Stderr => fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init(),
            LogSink::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {}", path.display()))?;
                fmt()
                    .with_env_filter(env_filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
            }
        }
        Ok(())
    })
    .map(|_| ())
}
