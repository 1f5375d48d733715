//! Status command - cache usage and contents

use super::open_engine;
use crate::cache::{format_bytes, AssetState, CacheReport, InspectOptions};
use crate::cli::args::{OutputFormat, StatusArgs};
use crate::config::LoadedConfig;
use crate::error::StagecacheResult;
use chrono::Local;
use console::style;

/// Execute the status command
pub fn execute(args: StatusArgs, loaded: &LoadedConfig) -> StagecacheResult<()> {
    let engine = open_engine(loaded)?;
    let report = engine.inspect(&InspectOptions {
        force: args.force,
        purge: args.purge,
        dry_run: args.dry_run,
    })?;

    match args.format {
        OutputFormat::Table => print_table(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => {
            for asset in &report.assets {
                println!("{}", asset.source.display());
            }
        }
    }
    Ok(())
}

fn print_table(report: &CacheReport) {
    println!("{}", style(report.root.display()).bold().cyan());
    let capacity = report
        .capacity
        .map(|c| format!(" of {}", format_bytes(c)))
        .unwrap_or_default();
    println!(
        "  {} used{}, {} free",
        format_bytes(report.used),
        capacity,
        format_bytes(report.free)
    );
    println!();

    if report.assets.is_empty() {
        println!("No cached assets.");
        return;
    }

    println!(
        "{:<10} {:<10} {:<14} {:<20} SOURCE",
        "SIZE", "TYPE", "STATE", "EXPIRES"
    );
    println!("{}", "-".repeat(80));

    for asset in &report.assets {
        // pad before styling so escape codes do not skew the columns
        let state = format!("{:<14}", asset.state.to_string());
        let state = match asset.state {
            AssetState::Active => style(state).green(),
            AssetState::Expired => style(state).yellow(),
            AssetState::Purged | AssetState::ToBePurged => style(state).dim(),
        };
        let expiry = asset
            .expiry
            .map(|e| e.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<10} {:<10} {} {:<20} {}",
            format_bytes(asset.size),
            asset.asset_type,
            state,
            expiry,
            asset.source.display()
        );
    }

    println!();
    println!("Total: {} asset(s)", report.assets.len());
}
