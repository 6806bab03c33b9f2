//! Bootstrap errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::steps::StepId;

/// Errors raised while checking or applying bootstrap steps.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// A command could not be started.
    #[error("Failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A command exited unsuccessfully.
    #[error("Command '{command}' failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// A file operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A bounded wait ran out of time.
    #[error("Timed out after {seconds}s waiting for {what}")]
    Timeout { what: String, seconds: u64 },

    /// A retried command failed on every attempt.
    #[error("'{command}' failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        command: String,
        attempts: u32,
        last_error: String,
    },

    /// A step's actions completed but its checks still fail.
    #[error("Step '{0}' applied but its checks still fail")]
    PostconditionUnmet(StepId),

    /// The user-data template failed to render.
    #[error("Template error: {0}")]
    Template(String),
}

impl BootstrapError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
