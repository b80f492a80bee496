//! `cartography sync`.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use cartography_core::{Config, UpdateTag};
use cartography_graph::{build_sync_from_config, run_with_config, STATUS_SUCCESS};

#[derive(Args)]
pub struct SyncArgs {
    /// Comma separated stages to run, e.g. `create-indexes,permission-relationships`
    #[arg(long)]
    pub selected_modules: Option<String>,

    /// Update tag to stamp on everything written (defaults to the current epoch second)
    #[arg(long)]
    pub update_tag: Option<i64>,

    /// YAML file mapping permissions to relationships
    #[arg(long)]
    pub permission_relationships_file: Option<PathBuf>,

    /// Directory of analysis job JSON files
    #[arg(long)]
    pub analysis_job_directory: Option<PathBuf>,
}

impl SyncArgs {
    fn apply(self, config: &mut Config) {
        if let Some(raw) = self.selected_modules {
            config.selected_modules = Some(Config::parse_selected_modules(&raw));
        }
        if let Some(tag) = self.update_tag {
            config.update_tag = Some(UpdateTag(tag));
        }
        if let Some(path) = self.permission_relationships_file {
            config.permission_relationships_file = Some(path);
        }
        if let Some(path) = self.analysis_job_directory {
            config.analysis_job_directory = Some(path);
        }
    }
}

pub async fn execute(args: SyncArgs, mut config: Config) -> Result<()> {
    args.apply(&mut config);
    let update_tag = config.resolve_update_tag();
    let sync = build_sync_from_config(&config)?;

    println!(
        "{} {} {}",
        "Syncing".bold(),
        sync.stage_names().join(", ").cyan(),
        format!("(update tag {})", update_tag).dimmed()
    );

    let status = run_with_config(&sync, config).await;
    if status != STATUS_SUCCESS {
        bail!("Sync failed with status {}; see the log for details", status);
    }

    println!("{}", "Sync complete.".green().bold());
    Ok(())
}
