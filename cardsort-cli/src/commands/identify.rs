//! Identify command implementation.

use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use cardsort_core::{
    BinSink, Collection, FrameOutcome, FramedLink, LogSink, NameReader, RecognitionContext,
    Recognizer, Settings, SortingMode,
};
use clap::Args;
use colored::Colorize;
use image::RgbImage;
use tracing::{info, warn};

use crate::ocr::CommandNameReader;
use crate::utils::{paint_bin, price_threshold, read_frame};

#[derive(Args)]
pub struct IdentifyArgs {
    /// Camera frame showing a single card
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Sorting mode (color, mana_value, set, price, type, buy or 1-6)
    #[arg(short, long, default_value = "color")]
    pub mode: SortingMode,

    /// Price threshold in dollars; required by the buy mode
    #[arg(short, long, value_name = "DOLLARS")]
    pub threshold: Option<f64>,

    /// Title-reading command; `{}` is replaced by the region image path
    #[arg(long, env = "CARDSORT_OCR_COMMAND", value_name = "CMD")]
    pub ocr_command: Option<String>,

    /// Use this title reading instead of running OCR
    #[arg(long, conflicts_with = "ocr_command")]
    pub name: Option<String>,

    /// Collection file for the set and buy modes
    #[arg(long, value_name = "FILE")]
    pub collection: Option<PathBuf>,

    /// Serial device of the sorter; the bin is only logged without one
    #[arg(long, value_name = "DEVICE")]
    pub actuator: Option<PathBuf>,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

/// Reader that always reports the same title, for frames whose name is known.
struct FixedName(String);

impl NameReader for FixedName {
    fn read_name(&mut self, _region: &RgbImage) -> Option<String> {
        Some(self.0.clone())
    }
}

fn name_reader(args: &IdentifyArgs) -> Result<Box<dyn NameReader>> {
    if let Some(name) = &args.name {
        return Ok(Box::new(FixedName(name.clone())));
    }
    match &args.ocr_command {
        Some(command) => Ok(Box::new(CommandNameReader::new(command)?)),
        None => bail!("No title reader configured: pass --ocr-command or --name"),
    }
}

fn bin_sink(device: Option<&PathBuf>) -> Result<Box<dyn BinSink>> {
    let Some(device) = device else {
        return Ok(Box::new(LogSink::default()));
    };
    let port = OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .with_context(|| format!("Failed to open sorter device: {}", device.display()))?;
    let link = FramedLink::connect(port)
        .with_context(|| format!("Sorter on {} did not report ready", device.display()))?;
    info!(device = %device.display(), "Sorter connected");
    Ok(Box::new(link))
}

/// Execute the identify command.
pub fn execute(settings: &Settings, args: IdentifyArgs, quiet: bool) -> Result<()> {
    let threshold = price_threshold(args.mode, args.threshold)?;
    let frame = read_frame(&args.image)?;
    let mut reader = name_reader(&args)?;

    let context = RecognitionContext::load(settings).context("Failed to load recognition data")?;
    let mut recognizer = Recognizer::new(context, args.mode, threshold);
    if let Some(path) = &args.collection {
        let collection = Collection::open(path)
            .with_context(|| format!("Failed to open collection: {}", path.display()))?;
        recognizer = recognizer.with_collection(collection);
    } else if args.mode.tracks_collection() {
        warn!(mode = %args.mode, "No collection file given; duplicates will not be detected");
    }

    let mut sink = bin_sink(args.actuator.as_ref())?;
    let outcome = recognizer
        .process_and_dispatch(&frame, reader.as_mut(), sink.as_mut())
        .context("Failed to process frame")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if !quiet {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &FrameOutcome) {
    println!();
    match outcome {
        FrameOutcome::NoCard => {
            println!("   {}", "No card found in frame".yellow());
        }
        FrameOutcome::Unrecognized { reason } => {
            println!("   {} {}", "Unrecognized:".red().bold(), reason);
        }
        FrameOutcome::Recognized(card) => {
            let verdict = if card.accepted {
                "verified".green()
            } else {
                "name mismatch, held back".yellow()
            };
            println!("   {} {} ({})", "Card:".dimmed(), card.name.bold(), card.set_code);
            println!("   {} {}", "Id:".dimmed(), card.card_id);
            println!("   {} {:.1}", "Distance:".dimmed(), card.distance);
            println!(
                "   {} {} [{:.2}, {}]",
                "Title read:".dimmed(),
                card.observed_name,
                card.similarity,
                verdict
            );
            if let Some(price) = &card.price {
                println!("   {} {}", "Price:".dimmed(), price);
            }
            if card.already_owned {
                println!("   {} {}", "Collection:".dimmed(), "already owned".yellow());
            }
        }
    }
    if let Some(label) = outcome.dispatch_label() {
        println!("   {} {}", "Bin:".dimmed(), paint_bin(&label));
    }
    println!();
}
