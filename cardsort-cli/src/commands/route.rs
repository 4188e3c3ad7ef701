//! Route command implementation.

use anyhow::{Context, Result};
use cardsort_core::{route, Catalog, Settings, SortingMode};
use colored::Colorize;
use tracing::info;

use crate::utils::paint_bin;

/// Execute the route command. Prints only the bin label on stdout.
pub fn execute(settings: &Settings, card_id: &str, mode: SortingMode, threshold: f64) -> Result<()> {
    let catalog = Catalog::load_newest(&settings.data_dir, &settings.catalog_prefix)
        .context("Failed to load catalog")?;

    let card = catalog.get(card_id);
    if card.is_none() {
        eprintln!("{}", format!("Card {card_id} is not in the catalog").yellow());
    }
    let label = route(card, mode, threshold);
    info!(card_id, %mode, bin = %label, "Routed");
    println!("{}", paint_bin(&label));
    Ok(())
}
