//! Aggregate result of a build run

use std::fmt;

use serde::Serialize;

/// A single reason a build did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildFailure {
    /// Source could not be cloned or updated
    Checkout { message: String },

    /// Output left by a previous build could not be removed
    StaleOutput { path: String, message: String },

    /// Build command could not be started
    Spawn { message: String },

    /// Build command exited unsuccessfully; `None` when killed by a signal
    ExitStatus { code: Option<i32> },

    /// Build command wrote to its diagnostic stream
    Diagnostics { lines: usize },

    /// Build output directory is absent or unreadable
    OutputMissing { path: String },

    /// One object could not be stored
    Upload { key: String, message: String },
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildFailure::Checkout { message } => write!(f, "checkout failed: {message}"),
            BuildFailure::StaleOutput { path, message } => {
                write!(f, "could not clear {path}: {message}")
            }
            BuildFailure::Spawn { message } => write!(f, "could not start build: {message}"),
            BuildFailure::ExitStatus { code: Some(code) } => {
                write!(f, "build exited with status {code}")
            }
            BuildFailure::ExitStatus { code: None } => write!(f, "build terminated by signal"),
            BuildFailure::Diagnostics { lines } => {
                write!(f, "build wrote {lines} line(s) to stderr")
            }
            BuildFailure::OutputMissing { path } => write!(f, "no build output at {path}"),
            BuildFailure::Upload { key, message } => write!(f, "upload of {key} failed: {message}"),
        }
    }
}

/// Outcome accumulated while a build runs.
///
/// A build succeeded iff no failure was recorded. Uploads continue after an
/// individual failure, so `uploaded` may be non-empty for a failed build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildOutcome {
    pub failures: Vec<BuildFailure>,

    /// Object keys written, in upload order
    pub uploaded: Vec<String>,
}

impl BuildOutcome {
    pub fn record(&mut self, failure: BuildFailure) {
        self.failures.push(failure);
    }

    pub fn record_upload(&mut self, key: String) {
        self.uploaded.push(key);
    }

    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    /// Process exit code reported to the job runner
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }
}
