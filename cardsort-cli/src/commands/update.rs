//! Update command implementation.

use anyhow::{Context, Result};
use cardsort_core::builder::{BuildReport, CatalogSync, SyncOutcome};
use cardsort_core::{Catalog, DatabaseBuilder, Settings};
use colored::Colorize;
use tracing::info;

/// Execute the update command: catalog sync, then the database build.
pub async fn execute(settings: &Settings, skip_catalog: bool, force: bool, quiet: bool) -> Result<()> {
    std::fs::create_dir_all(&settings.data_dir).with_context(|| {
        format!("Failed to create data directory: {}", settings.data_dir.display())
    })?;

    if skip_catalog {
        info!("Catalog sync skipped");
    } else {
        let outcome = CatalogSync::from_settings(settings)?
            .sync(force)
            .await
            .context("Catalog sync failed")?;
        if !quiet {
            print_sync(&outcome);
        }
    }

    let catalog = Catalog::load_newest(&settings.data_dir, &settings.catalog_prefix)
        .context("Failed to load catalog")?;
    let builder = DatabaseBuilder::from_settings(settings)?;
    let report = builder.run(&catalog).await.context("Database build failed")?;

    if !quiet {
        print_report(&report);
    }
    Ok(())
}

fn print_sync(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Skipped { newer_by_days, .. } => println!(
            "{} local snapshot is current (remote newer by {} day(s))",
            "Catalog:".dimmed(),
            newer_by_days
        ),
        SyncOutcome::Downloaded { path, bytes, removed } => println!(
            "{} downloaded {} ({} bytes, {} old snapshot(s) removed)",
            "Catalog:".dimmed(),
            path.display(),
            bytes,
            removed
        ),
    }
}

fn print_report(report: &BuildReport) {
    println!();
    if report.is_noop() {
        println!("{}", "Fingerprint store is up to date".green().bold());
    } else {
        println!("{}", "Fingerprint store updated".green().bold());
    }
    println!(
        "   {} {} ok, {} failed",
        "Downloads:".dimmed(),
        report.downloads_succeeded,
        report.downloads_failed
    );
    println!(
        "   {} {} ok, {} failed",
        "Hashes:".dimmed(),
        report.hashes_succeeded,
        report.hashes_failed
    );
    println!(
        "   {} {} added, {} total",
        "Fingerprints:".dimmed(),
        report.fingerprints_added,
        report.store_total
    );
    if report.downloads_failed > 0 || report.hashes_failed > 0 {
        println!(
            "   {}",
            "Failed cards are retried on the next update".yellow()
        );
    }
    println!();
}
