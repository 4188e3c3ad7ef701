//! Organize command implementation.

use anyhow::{Context, Result};
use cardsort_core::{ImageStore, Settings};
use colored::Colorize;

/// Execute the organize command.
pub fn execute(settings: &Settings, quiet: bool) -> Result<()> {
    let store = ImageStore::new(settings.images_path());
    let moved = store
        .organize()
        .with_context(|| format!("Failed to organize images in {}", store.root().display()))?;

    if !quiet {
        println!(
            "{} {} image(s) moved into shard directories under {}",
            "Organized:".green().bold(),
            moved,
            store.root().display()
        );
    }
    Ok(())
}
