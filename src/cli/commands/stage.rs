//! Stage command - copy an asset into the cache

use super::open_engine;
use crate::cache::{StageOptions, StageOutcome};
use crate::cli::args::StageArgs;
use crate::config::LoadedConfig;
use crate::error::StagecacheResult;
use crate::retention::parse_retention;
use crate::target::resolve_target;
use console::style;
use tracing::info;

/// Execute the stage command
///
/// Only the cached path goes to stdout.
pub fn execute(args: StageArgs, loaded: &LoadedConfig) -> StagecacheResult<()> {
    let engine = open_engine(loaded)?;
    let asset_type = engine.asset_types().get(&args.atype)?.clone();
    let target = resolve_target(&args.target, asset_type, &loaded.config.remote)?;

    let options = StageOptions {
        retention: args.time.as_deref().map(parse_retention).transpose()?,
        force: args.force,
        purge: args.purge,
        dry_run: args.dry_run,
    };

    let staged = engine.stage(target.as_ref(), &options)?;
    info!(
        "{} {} -> {}",
        staged.outcome,
        target.source_path().display(),
        staged.path.display()
    );

    if args.dry_run {
        eprintln!(
            "{} nothing was changed (dry run, would be {})",
            style("Note:").yellow(),
            staged.outcome
        );
    } else if staged.outcome == StageOutcome::Purged {
        eprintln!(
            "{} removed {} from the cache",
            style("Purged:").green(),
            target.source_path().display()
        );
    }

    println!("{}", staged.path.display());
    Ok(())
}
