use crate::backup::engine::{RetentionEngine, RunSummary};
use crate::backup::fs::LocalFs;
use crate::backup::report::TracingReporter;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::retention::{parse_threshold, RetentionPolicy};
use crate::backup::validate::validate_not_a_file;
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use validator::Validate;

pub static DEFAULT_ROOT_DIR: &str = "/destination";
pub static RETENTION_COUNT_VAR: &str = "BACKUP_RETENTION_COUNT";
pub static RETENTION_DAYS_VAR: &str = "BACKUP_RETENTION_DAYS";

/// Everything a cleanup run needs: where the containers live, the retention
/// thresholds and whether deletions are only simulated.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct CleanupConfig {
    #[serde(default = "default_root_dir")]
    #[builder(default = default_root_dir(), into)]
    #[validate(custom(function = validate_not_a_file))]
    root_dir: PathBuf,
    #[serde(flatten)]
    #[builder(default)]
    #[validate(nested)]
    policy: RetentionPolicy,
    #[serde(default)]
    #[builder(default)]
    dry_run: bool,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ROOT_DIR)
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Raw values from the command line or environment. Thresholds stay
/// strings so a malformed value can disable its rule instead of failing.
#[derive(Clone, Debug, Default, Builder)]
pub struct ConfigOverrides {
    #[builder(into)]
    pub root_dir: Option<PathBuf>,
    #[builder(into)]
    pub retention_count: Option<String>,
    #[builder(into)]
    pub retention_days: Option<String>,
    #[builder(into)]
    pub dry_run: Option<String>,
}

impl CleanupConfig {
    /// Reads a YAML config file, or starts from defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => File::open(path)
                .map_err(Error::from)
                .and_then(|f| serde_yml::from_reader::<_, Self>(f).map_err(Error::from))
                .with_msg(format!("Parse YAML config failed: {:?}", path)),
        }
    }

    pub fn apply(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(root_dir) = overrides.root_dir {
            self.root_dir = root_dir;
        }
        if let Some(raw) = overrides.retention_count {
            self.policy.retention_count = parse_threshold(RETENTION_COUNT_VAR, &raw);
        }
        if let Some(raw) = overrides.retention_days {
            self.policy.retention_days = parse_threshold(RETENTION_DAYS_VAR, &raw);
        }
        if let Some(raw) = overrides.dry_run {
            self.dry_run = parse_dry_run(&raw);
        }
        self
    }

    pub fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(Error::from)
            .map(|_| self)
    }

    pub fn run(&self) -> Result<RunSummary> {
        info!(
            "Starting backup retention cleanup in '{}' with retention_count={}, retention_days={}, dry_run={}",
            self.root_dir.display(),
            display_threshold(self.policy.retention_count),
            display_threshold(self.policy.retention_days),
            self.dry_run
        );

        RetentionEngine::builder()
            .fs(LocalFs)
            .reporter(TracingReporter)
            .policy(self.policy)
            .dry_run(self.dry_run)
            .build()
            .run(&self.root_dir)
    }
}

pub fn parse_dry_run(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn display_threshold<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "None".to_string(), |v| v.to_string())
}
