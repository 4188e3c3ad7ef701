//! Cardsort CLI - trading card identification and sorting.

use std::path::PathBuf;

use anyhow::Result;
use cardsort_core::SortingMode;
use clap::{Parser, Subcommand};
use colored::Colorize;

mod commands;
mod exit_codes;
mod ocr;
mod utils;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  64  Usage error (invalid arguments)
  65  Malformed catalog or hash store
  66  Missing input (image, catalog snapshot, hash store)
  69  Service unavailable (network)
  74  I/O error";

#[derive(Parser)]
#[command(name = "cardsort")]
#[command(author, version, about = "Trading card identification and sorting", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Directory holding catalog snapshots, the hash store and card images
    #[arg(short, long, global = true, env = "CARDSORT_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify the card in a camera frame and route it to a bin
    Identify(commands::identify::IdentifyArgs),

    /// Print the bin a catalog card would be routed to
    Route {
        /// Catalog card id
        #[arg(value_name = "CARD_ID")]
        card_id: String,

        /// Sorting mode (color, mana_value, set, price, type, buy or 1-6)
        #[arg(short, long, default_value = "color")]
        mode: SortingMode,

        /// Price threshold in dollars; required by the buy mode
        #[arg(short, long, value_name = "DOLLARS")]
        threshold: Option<f64>,
    },

    /// Refresh the catalog, download missing images and hash them
    Update {
        /// Keep the local catalog snapshot
        #[arg(long)]
        skip_catalog: bool,

        /// Download the catalog snapshot even if the local one is recent
        #[arg(long, conflicts_with = "skip_catalog")]
        force: bool,

        /// Concurrent image downloads
        #[arg(long, value_name = "N")]
        download_workers: Option<usize>,

        /// Concurrent hash workers
        #[arg(long, value_name = "N")]
        hash_workers: Option<usize>,
    },

    /// Move flat images in the image store into their shard directories
    Organize,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    utils::init_tracing(cli.verbose, cli.quiet);

    if let Err(err) = run(cli).await {
        let exit = ExitCode::from_anyhow(&err);
        if let Some(message) = &exit.message {
            eprintln!("{} {}", "Error:".red().bold(), message);
        }
        std::process::exit(exit.code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = utils::load_settings(cli.data_dir);
    let quiet = cli.quiet;

    match cli.command {
        Commands::Identify(args) => commands::identify::execute(&settings, args, quiet),
        Commands::Route {
            card_id,
            mode,
            threshold,
        } => commands::route::execute(
            &settings,
            &card_id,
            mode,
            utils::price_threshold(mode, threshold)?,
        ),
        Commands::Update {
            skip_catalog,
            force,
            download_workers,
            hash_workers,
        } => {
            let mut settings = settings;
            if let Some(workers) = download_workers {
                settings.builder.download_workers = workers;
            }
            if let Some(workers) = hash_workers {
                settings.builder.hash_workers = workers;
            }
            commands::update::execute(&settings, skip_catalog, force, quiet).await
        }
        Commands::Organize => commands::organize::execute(&settings, quiet),
    }
}
