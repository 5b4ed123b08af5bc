mod app;
mod commands;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nous-review", about = "Review Nous flashcards with spaced repetition", version)]
struct Cli {
    /// Collection directory (default: <data dir>/nous/review)
    #[arg(long, global = true)]
    collection: Option<PathBuf>,

    /// Scheduling configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Seed queue selection and interval fuzz
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Create new cards for a note
    Add {
        /// Note the cards belong to
        #[arg(long)]
        note: i64,
        /// Number of cards to create
        #[arg(long, default_value = "1")]
        count: usize,
        /// Card payload as JSON (use "-" to read from stdin)
        #[arg(long)]
        data: Option<String>,
    },

    /// Show card counts and today's remaining quotas
    Stats,

    /// Start an interactive review session
    Review {
        /// Stop after this many answers
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Preview the next due date for every grade of a card
    Grades {
        /// Card id
        #[arg(long)]
        card: i64,
    },
}

/// Resolve "-" as stdin
fn resolve_data(data: Option<String>) -> Option<String> {
    match data.as_deref() {
        Some("-") => {
            let mut buf = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf).ok();
            Some(buf)
        }
        _ => data,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && atty_check();
    let app = app::App::new(cli.collection.as_deref(), cli.config.as_deref(), cli.seed)?;

    match cli.command {
        Command::Add { note, count, data } => {
            let data = resolve_data(data);
            commands::add::run(&app, note, count, data.as_deref(), &cli.format).await?;
        }
        Command::Stats => {
            commands::stats::run(&app, &cli.format, use_color).await?;
        }
        Command::Review { limit } => {
            commands::review::run(&app, limit, use_color).await?;
        }
        Command::Grades { card } => {
            commands::grades::run(&app, card, &cli.format, use_color)?;
        }
    }

    Ok(())
}

/// Check if stdout is a terminal (for color support)
fn atty_check() -> bool {
    unsafe { libc_isatty(1) != 0 }
}

extern "C" {
    #[link_name = "isatty"]
    fn libc_isatty(fd: i32) -> i32;
}
