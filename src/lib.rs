//! # backup_retention
//!
//! Prunes old backups laid out as `root/<container>/<backup>/`.
//!
//! ## Features
//!
//! - **Count retention**: keep only the newest N backups of each container
//! - **Age retention**: drop backups whose modification time is older than N days
//! - **Dry run**: report what would be removed without touching anything
//! - **Failure isolation**: a backup that cannot be read or deleted is reported and skipped
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//!
//! // Keep the 7 newest backups per container, and nothing older than 30 days.
//! let summary = backup_retention::backup::engine::run(
//!     Path::new("/destination"),
//!     Some(7),
//!     Some(30),
//!     false,
//! )?;
//! println!("removed {} backups", summary.removed());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
