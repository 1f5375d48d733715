//! Manage command - cache maintenance

use super::open_engine;
use crate::cache::{format_bytes, gb_to_bytes};
use crate::cli::args::{ManageAction, ManageArgs};
use crate::config::LoadedConfig;
use crate::error::StagecacheResult;
use console::style;

/// Execute the manage command
pub fn execute(args: ManageArgs, loaded: &LoadedConfig) -> StagecacheResult<()> {
    let engine = open_engine(loaded)?;

    match args.action {
        ManageAction::Free {
            gigs,
            suffix,
            dry_run,
        } => {
            let freed = engine.free_bytes(gb_to_bytes(gigs), suffix.as_deref(), dry_run)?;
            for source in &freed.removed {
                println!("{}", source.display());
            }
            let verb = if dry_run { "Would remove" } else { "Removed" };
            eprintln!(
                "{} {} asset(s), {}",
                style(verb).green(),
                freed.removed.len(),
                format_bytes(freed.freed)
            );
        }
        ManageAction::Unlisted => {
            let unlisted = engine.find_unlisted_assets()?;
            if unlisted.is_empty() {
                eprintln!("{}", style("Every asset on disk is listed").green());
            }
            for source in unlisted {
                println!("{}", source.display());
            }
        }
    }
    Ok(())
}
