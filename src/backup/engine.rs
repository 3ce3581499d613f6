//! Walks `root/<container>/<backup>` and prunes backups that fall out of retention.
//!
//! Only a missing (or unreadable) root aborts a run. Everything below that is
//! handled per item: a container that cannot be listed, a backup whose
//! modification time cannot be read, or a backup that cannot be deleted is
//! reported and skipped, and the run moves on.

use crate::backup::fs::{BackupFs, LocalFs};
use crate::backup::report::{Reporter, TracingReporter};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::retention::{sort_oldest_first, Backup, RetentionPolicy};
use bon::Builder;
use chrono::{DateTime, Local, Utc};
use getset::CopyGetters;
use std::ffi::OsString;
use std::path::Path;

static CREATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Counters collected over one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct RunSummary {
    containers: usize,
    backups: usize,
    stat_failures: usize,
    marked: usize,
    removed: usize,
    would_remove: usize,
    removal_failures: usize,
}

#[derive(Builder)]
pub struct RetentionEngine<F: BackupFs, R: Reporter> {
    fs: F,
    reporter: R,
    #[builder(default)]
    policy: RetentionPolicy,
    #[builder(default)]
    dry_run: bool,
}

impl<F: BackupFs, R: Reporter> RetentionEngine<F, R> {
    pub fn run(&self, root: &Path) -> Result<RunSummary> {
        self.run_at(root, Utc::now())
    }

    /// Same as [`Self::run`] with an explicit clock for the age rule.
    pub fn run_at(&self, root: &Path, now: DateTime<Utc>) -> Result<RunSummary> {
        if !self.fs.exists(root) {
            self.reporter.error(&format!(
                "Destination directory '{}' does not exist.",
                root.display()
            ));
            return Err(Error::RootMissing(root.to_path_buf()));
        }

        let containers = self.fs.list_dir(root).inspect_err(|e| {
            self.reporter.error(&format!(
                "Could not list destination directory '{}': {e}",
                root.display()
            ))
        })?;

        let mut summary = RunSummary::default();
        for container in containers {
            let container_path = root.join(&container);
            if !self.fs.is_dir(&container_path) {
                continue;
            }
            summary.containers += 1;
            self.process_container(&display_name(&container), &container_path, now, &mut summary);
        }

        Ok(summary)
    }

    fn process_container(
        &self,
        container: &str,
        container_path: &Path,
        now: DateTime<Utc>,
        summary: &mut RunSummary,
    ) {
        let backups = match self.collect_backups(container_path, summary) {
            Ok(backups) => backups,
            Err(e) => {
                self.reporter.error(&format!(
                    "Could not list backups for container '{container}': {e}"
                ));
                return;
            }
        };

        if backups.is_empty() {
            self.reporter
                .info(&format!("No backups found for container '{container}'."));
            return;
        }

        let backups = sort_oldest_first(backups);
        for (backup, rule) in self.policy.marks(&backups, now) {
            self.reporter.debug(&format!(
                "Marking backup '{}' for deletion by {rule} policy.",
                backup.name()
            ));
        }
        let to_delete = self.policy.get_delete(&backups, now);
        summary.marked += to_delete.len();

        for backup in backups.iter().filter(|b| to_delete.contains(b)) {
            self.delete_backup(container, backup, summary);
        }
    }

    fn collect_backups(&self, container_path: &Path, summary: &mut RunSummary) -> Result<Vec<Backup>> {
        let entries = self.fs.list_dir(container_path)?;
        let mut backups = Vec::with_capacity(entries.len());

        for entry in entries {
            let path = container_path.join(&entry);
            if !self.fs.is_dir(&path) {
                continue;
            }
            match self.fs.modified(&path) {
                Ok(time) => {
                    summary.backups += 1;
                    backups.push(
                        Backup::builder()
                            .name(display_name(&entry))
                            .path(path)
                            .time(time)
                            .build(),
                    );
                }
                Err(e) => {
                    summary.stat_failures += 1;
                    self.reporter.error(&format!(
                        "Could not get modification time for {}: {e}",
                        path.display()
                    ));
                }
            }
        }

        Ok(backups)
    }

    fn delete_backup(&self, container: &str, backup: &Backup, summary: &mut RunSummary) {
        let created = backup
            .time()
            .with_timezone(&Local)
            .format(CREATED_FORMAT);

        if self.dry_run {
            summary.would_remove += 1;
            self.reporter.info(&format!(
                "[DRY RUN] Would remove backup '{}' (created {created}) for container '{container}'.",
                backup.name()
            ));
            return;
        }

        self.reporter.info(&format!(
            "Removing backup '{}' (created {created}) for container '{container}'.",
            backup.name()
        ));
        match self
            .fs
            .remove_tree(backup.path())
            .with_msg(format!("Delete backup {:?} failed", backup.path()))
        {
            Ok(()) => summary.removed += 1,
            Err(e) => {
                summary.removal_failures += 1;
                self.reporter.error(&format!(
                    "Error deleting backup '{}' for container '{container}': {e}",
                    backup.name()
                ));
            }
        }
    }
}

fn display_name(name: &OsString) -> String {
    name.to_string_lossy().into_owned()
}

/// Runs a cleanup of `root` against the local filesystem, reporting through `tracing`.
pub fn run(
    root: &Path,
    retention_count: Option<usize>,
    retention_days: Option<u64>,
    dry_run: bool,
) -> Result<RunSummary> {
    RetentionEngine::builder()
        .fs(LocalFs)
        .reporter(TracingReporter)
        .policy(
            RetentionPolicy::builder()
                .maybe_retention_count(retention_count)
                .maybe_retention_days(retention_days)
                .build(),
        )
        .dry_run(dry_run)
        .build()
        .run(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::fs::testing::MemoryFs;
    use crate::backup::report::testing::RecordingReporter;
    use crate::backup::report::Level;
    use chrono::{Duration, TimeZone};
    use std::fs::File;
    use std::path::PathBuf;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        now() - Duration::days(days)
    }

    fn engine<'a>(
        fs: &'a MemoryFs,
        reporter: &'a RecordingReporter,
        policy: RetentionPolicy,
        dry_run: bool,
    ) -> RetentionEngine<&'a MemoryFs, &'a RecordingReporter> {
        RetentionEngine::builder()
            .fs(fs)
            .reporter(reporter)
            .policy(policy)
            .dry_run(dry_run)
            .build()
    }

    fn five_backups() -> MemoryFs {
        (1..=5).fold(
            MemoryFs::default()
                .dir("/destination", now())
                .dir("/destination/db1", now()),
            |fs, d| fs.dir(format!("/destination/db1/aged-{d}"), days_ago(d)),
        )
    }

    #[test]
    fn test_count_policy_removes_two_oldest() {
        let fs = five_backups();
        let reporter = RecordingReporter::default();
        let policy = RetentionPolicy::builder().retention_count(3).build();

        let summary = engine(&fs, &reporter, policy, false)
            .run_at(Path::new("/destination"), now())
            .unwrap();

        assert_eq!(
            fs.removals(),
            vec![
                PathBuf::from("/destination/db1/aged-5"),
                PathBuf::from("/destination/db1/aged-4"),
            ]
        );
        assert_eq!(summary.removed(), 2);
        assert_eq!(summary.backups(), 5);
        assert_eq!(fs.list_dir(Path::new("/destination/db1")).unwrap().len(), 3);
        assert!(reporter.contains(Level::Info, "Removing backup 'aged-5'"));
        assert!(reporter.contains(
            Level::Debug,
            "Marking backup 'aged-4' for deletion by count policy."
        ));
    }

    #[test]
    fn test_age_policy_removes_only_expired() {
        let fs = MemoryFs::default()
            .dir("/destination", now())
            .dir("/destination/db1", now())
            .dir("/destination/db1/a", days_ago(1))
            .dir("/destination/db1/b", days_ago(10))
            .dir("/destination/db1/c", days_ago(40));
        let reporter = RecordingReporter::default();
        let policy = RetentionPolicy::builder().retention_days(30).build();

        engine(&fs, &reporter, policy, false)
            .run_at(Path::new("/destination"), now())
            .unwrap();

        assert_eq!(fs.removals(), vec![PathBuf::from("/destination/db1/c")]);
        assert!(reporter.contains(
            Level::Debug,
            "Marking backup 'c' for deletion by age policy."
        ));
    }

    #[test]
    fn test_empty_container_reports_no_backups() {
        let fs = MemoryFs::default()
            .dir("/destination", now())
            .dir("/destination/db2", now())
            .file("/destination/db2/README");
        let reporter = RecordingReporter::default();
        let policy = RetentionPolicy::builder().retention_count(1).build();

        let summary = engine(&fs, &reporter, policy, false)
            .run_at(Path::new("/destination"), now())
            .unwrap();

        assert!(fs.removals().is_empty());
        assert_eq!(summary.containers(), 1);
        assert_eq!(
            reporter.at(Level::Info),
            vec!["No backups found for container 'db2'.".to_string()]
        );
        assert!(reporter.at(Level::Error).is_empty());
    }

    #[test]
    fn test_dry_run_reports_without_deleting() {
        let fs = MemoryFs::default()
            .dir("/destination", now())
            .dir("/destination/db1", now())
            .dir("/destination/db1/2023-01-01", days_ago(500));
        let reporter = RecordingReporter::default();
        let policy = RetentionPolicy::builder().retention_days(30).build();

        let summary = engine(&fs, &reporter, policy, true)
            .run_at(Path::new("/destination"), now())
            .unwrap();

        assert!(fs.removals().is_empty());
        assert!(fs.exists(Path::new("/destination/db1/2023-01-01")));
        assert_eq!(summary.would_remove(), 1);
        assert_eq!(summary.removed(), 0);
        assert!(reporter.contains(
            Level::Info,
            "[DRY RUN] Would remove backup '2023-01-01' (created "
        ));
        assert!(reporter.contains(Level::Info, "for container 'db1'."));
    }

    #[test]
    fn test_dry_run_twice_is_identical() {
        let fs = five_backups();
        let policy = RetentionPolicy::builder()
            .retention_count(2)
            .retention_days(4)
            .build();

        let first = RecordingReporter::default();
        let second = RecordingReporter::default();
        let s1 = engine(&fs, &first, policy, true)
            .run_at(Path::new("/destination"), now())
            .unwrap();
        let s2 = engine(&fs, &second, policy, true)
            .run_at(Path::new("/destination"), now())
            .unwrap();

        assert_eq!(s1, s2);
        assert_eq!(s1.would_remove(), 3);
        assert_eq!(first.messages(), second.messages());
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let fs = MemoryFs::default();
        let reporter = RecordingReporter::default();
        let policy = RetentionPolicy::builder().retention_count(1).build();

        let err = engine(&fs, &reporter, policy, false)
            .run_at(Path::new("/destination"), now())
            .unwrap_err();

        assert!(err.is_root_missing());
        assert_eq!(
            reporter.messages(),
            vec![(
                Level::Error,
                "Destination directory '/destination' does not exist.".to_string()
            )]
        );
    }

    #[test]
    fn test_stat_failure_skips_only_that_backup() {
        let fs = MemoryFs::default()
            .dir("/destination", now())
            .dir("/destination/db1", now())
            .dir("/destination/db1/a", days_ago(3))
            .unstatable_dir("/destination/db1/b")
            .dir("/destination/db1/c", days_ago(2))
            .dir("/destination/db1/d", days_ago(1));
        let reporter = RecordingReporter::default();
        let policy = RetentionPolicy::builder().retention_count(2).build();

        let summary = engine(&fs, &reporter, policy, false)
            .run_at(Path::new("/destination"), now())
            .unwrap();

        assert_eq!(summary.stat_failures(), 1);
        assert_eq!(summary.backups(), 3);
        assert_eq!(fs.removals(), vec![PathBuf::from("/destination/db1/a")]);
        assert!(reporter.contains(
            Level::Error,
            "Could not get modification time for /destination/db1/b"
        ));
    }

    #[test]
    fn test_removal_failure_does_not_stop_run() {
        let fs = MemoryFs::default()
            .dir("/destination", now())
            .dir("/destination/db1", now())
            .dir("/destination/db1/old", days_ago(90))
            .dir("/destination/db1/older", days_ago(120))
            .dir("/destination/db2", now())
            .dir("/destination/db2/old", days_ago(90))
            .failing_removal("/destination/db1/older");
        let reporter = RecordingReporter::default();
        let policy = RetentionPolicy::builder().retention_days(30).build();

        let summary = engine(&fs, &reporter, policy, false)
            .run_at(Path::new("/destination"), now())
            .unwrap();

        assert_eq!(
            fs.removals(),
            vec![
                PathBuf::from("/destination/db1/old"),
                PathBuf::from("/destination/db2/old"),
            ]
        );
        assert_eq!(summary.removal_failures(), 1);
        assert_eq!(summary.removed(), 2);
        assert!(reporter.contains(
            Level::Error,
            "Error deleting backup 'older' for container 'db1':"
        ));
    }

    #[test]
    fn test_unlistable_container_is_skipped() {
        let fs = MemoryFs::default()
            .dir("/destination", now())
            .unlistable_dir("/destination/db1", now())
            .dir("/destination/db1/old", days_ago(90))
            .dir("/destination/db2", now())
            .dir("/destination/db2/old", days_ago(90));
        let reporter = RecordingReporter::default();
        let policy = RetentionPolicy::builder().retention_days(30).build();

        let summary = engine(&fs, &reporter, policy, false)
            .run_at(Path::new("/destination"), now())
            .unwrap();

        assert_eq!(fs.removals(), vec![PathBuf::from("/destination/db2/old")]);
        assert_eq!(summary.containers(), 2);
        assert_eq!(summary.removed(), 1);
        assert!(fs.exists(Path::new("/destination/db1/old")));
        assert!(reporter.contains(
            Level::Error,
            "Could not list backups for container 'db1':"
        ));
    }

    #[test]
    fn test_unlistable_root_is_fatal() {
        let fs = MemoryFs::default()
            .unlistable_dir("/destination", now())
            .dir("/destination/db1", now())
            .dir("/destination/db1/old", days_ago(90));
        let reporter = RecordingReporter::default();
        let policy = RetentionPolicy::builder().retention_count(0).build();

        let result = engine(&fs, &reporter, policy, false)
            .run_at(Path::new("/destination"), now());

        let err = result.unwrap_err();
        assert!(!err.is_root_missing());
        assert!(fs.removals().is_empty());
        assert_eq!(
            reporter.at(Level::Error).len(),
            1,
            "{:?}",
            reporter.messages()
        );
        assert!(reporter.contains(
            Level::Error,
            "Could not list destination directory '/destination':"
        ));
    }

    #[test]
    fn test_matching_both_rules_removes_once() {
        let fs = five_backups();
        let reporter = RecordingReporter::default();
        let policy = RetentionPolicy::builder()
            .retention_count(4)
            .retention_days(2)
            .build();

        let summary = engine(&fs, &reporter, policy, false)
            .run_at(Path::new("/destination"), now())
            .unwrap();

        assert_eq!(summary.marked(), 3);
        assert_eq!(
            fs.removals(),
            vec![
                PathBuf::from("/destination/db1/aged-5"),
                PathBuf::from("/destination/db1/aged-4"),
                PathBuf::from("/destination/db1/aged-3"),
            ]
        );
        assert_eq!(reporter.at(Level::Debug).len(), 4);
    }

    #[test]
    fn test_disabled_policy_and_root_files_are_ignored() {
        let fs = five_backups().file("/destination/notes.txt");
        let reporter = RecordingReporter::default();

        let summary = engine(&fs, &reporter, RetentionPolicy::default(), false)
            .run_at(Path::new("/destination"), now())
            .unwrap();

        assert_eq!(summary.containers(), 1);
        assert_eq!(summary.marked(), 0);
        assert!(fs.removals().is_empty());
        assert!(reporter.at(Level::Info).is_empty());
    }

    fn backup_dir(root: &Path, container: &str, name: &str, age_days: u64) -> PathBuf {
        let dir = root.join(container).join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("dump.sql"), "select 1;").unwrap();
        let mtime = SystemTime::now() - std::time::Duration::from_secs(age_days * 86_400);
        File::open(&dir).unwrap().set_modified(mtime).unwrap();
        dir
    }

    #[test]
    fn test_local_fs_run_prunes_real_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let fresh = backup_dir(root, "db1", "fresh", 1);
        let stale = backup_dir(root, "db1", "stale", 45);
        let other = backup_dir(root, "db2", "stale", 45);
        std::fs::create_dir(root.join("empty")).unwrap();

        let summary = run(root, None, Some(30), false).unwrap();

        assert!(fresh.exists());
        assert!(!stale.exists());
        assert!(!other.exists());
        assert_eq!(summary.containers(), 3);
        assert_eq!(summary.removed(), 2);
    }

    #[test]
    fn test_local_fs_dry_run_keeps_directories() {
        let temp_dir = TempDir::new().unwrap();
        let stale = backup_dir(temp_dir.path(), "db1", "2023-01-01", 400);

        let summary = run(temp_dir.path(), Some(0), None, true).unwrap();

        assert!(stale.exists());
        assert_eq!(summary.would_remove(), 1);
    }

    #[test]
    fn test_local_fs_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let result = run(&temp_dir.path().join("destination"), Some(1), None, false);
        assert!(result.unwrap_err().is_root_missing());
    }
}
