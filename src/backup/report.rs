//! Reporting capability handed to the retention engine.
//!
//! The engine never touches a global logger directly; it reports through a
//! [`Reporter`] so that callers decide where messages end up. [`TracingReporter`]
//! forwards everything to `tracing`, which is what the binary uses.

use derive_more::Display;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum Level {
    #[display("ERROR")]
    Error,
    #[display("INFO")]
    Info,
    #[display("DEBUG")]
    Debug,
}

pub trait Reporter {
    fn report(&self, level: Level, message: &str);

    fn error(&self, message: &str) {
        self.report(Level::Error, message)
    }

    fn info(&self, message: &str) {
        self.report(Level::Info, message)
    }

    fn debug(&self, message: &str) {
        self.report(Level::Debug, message)
    }
}

impl<R: Reporter + ?Sized> Reporter for &R {
    fn report(&self, level: Level, message: &str) {
        (**self).report(level, message)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, level: Level, message: &str) {
        match level {
            Level::Error => tracing::error!("{message}"),
            Level::Info => tracing::info!("{message}"),
            Level::Debug => tracing::debug!("{message}"),
        }
    }
}
