use backup_retention::backup::cleanup_config::{CleanupConfig, ConfigOverrides};
use backup_retention::backup::engine::RunSummary;
use backup_retention::backup::result_error::result::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::exit;
use tracing::{error, info, Level};

/// Delete backups that exceed a retention count or age, per container directory
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Optional YAML config file, overridden by the flags below
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding one subdirectory per container
    #[arg(short, long, env = "BACKUP_ROOT")]
    root: Option<PathBuf>,

    /// Maximum number of backups to keep per container
    #[arg(long, env = "BACKUP_RETENTION_COUNT")]
    retention_count: Option<String>,

    /// Maximum age of a backup in days
    #[arg(long, env = "BACKUP_RETENTION_DAYS")]
    retention_days: Option<String>,

    /// Only report what would be removed (true, 1 or yes)
    #[arg(long, env = "DRY_RUN", num_args = 0..=1, default_missing_value = "true")]
    dry_run: Option<String>,

    /// Also log each marking decision
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: Args) -> Result<RunSummary> {
    let overrides = ConfigOverrides {
        root_dir: args.root,
        retention_count: args.retention_count,
        retention_days: args.retention_days,
        dry_run: args.dry_run,
    };

    CleanupConfig::load(args.config.as_deref())?
        .apply(overrides)
        .validated()?
        .run()
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    match run(args) {
        Ok(summary) => info!("Cleanup finished: {summary:?}"),
        Err(e) => {
            // Already reported by the engine.
            if !e.is_root_missing() {
                error!("{e}");
            }
            exit(1);
        }
    }
}

