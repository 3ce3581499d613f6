//! Filesystem primitives the retention engine relies on.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use chrono::{DateTime, Utc};
use function_name::named;
use itertools::Itertools;
use std::ffi::OsString;
use std::path::Path;

/// The handful of filesystem calls needed to walk `root/container/backup`
/// and prune backups.
pub trait BackupFs {
    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Names of the immediate entries of `path`.
    fn list_dir(&self, path: &Path) -> Result<Vec<OsString>>;

    /// Last modification time of `path`.
    fn modified(&self, path: &Path) -> Result<DateTime<Utc>>;

    /// Recursively deletes `path` and everything below it.
    fn remove_tree(&self, path: &Path) -> Result<()>;
}

impl<F: BackupFs + ?Sized> BackupFs for &F {
    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        (**self).is_dir(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<OsString>> {
        (**self).list_dir(path)
    }

    fn modified(&self, path: &Path) -> Result<DateTime<Utc>> {
        (**self).modified(path)
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        (**self).remove_tree(path)
    }
}

/// [`BackupFs`] backed by `std::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFs;

impl BackupFs for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    #[named]
    fn list_dir(&self, path: &Path) -> Result<Vec<OsString>> {
        let names = std::fs::read_dir(path)
            .and_then(|rd| rd.map_ok(|de| de.file_name()).collect::<std::io::Result<Vec<_>>>())
            .map_err(Error::from)
            .with_debug_object_and_fn_name(path.to_path_buf(), function_path!())?;

        Ok(names.into_iter().sorted().collect())
    }

    fn modified(&self, path: &Path) -> Result<DateTime<Utc>> {
        std::fs::metadata(path)
            .and_then(|md| md.modified())
            .map(DateTime::<Utc>::from)
            .map_err(Error::from)
            .with_msg(format!("Read modification time of {:?} failed", path))
    }

    fn remove_tree(&self, path: &Path) -> Result<()> {
        std::fs::remove_dir_all(path)
            .map_err(Error::from)
            .with_msg(format!("Recursive delete of {:?} failed", path))
    }
}
