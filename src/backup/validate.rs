//! Validation functions for configuration values.

use std::path::Path;
use validator::ValidationError;

/// A root that is missing is fine here; the cleanup run reports that itself.
/// A root that exists but is not a directory is a configuration mistake.
pub fn validate_not_a_file<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() && !dir.is_dir() {
        return Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("{:?} is not a directory", dir).into()));
    }

    Ok(())
}
