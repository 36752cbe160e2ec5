//! # Worker Process Supervision
//!
//! The relay runs one auxiliary process next to itself for its whole
//! lifetime. The relay never talks to it: its stdout and stderr are captured
//! and logged line by line, and it is terminated when the relay shuts down.
//!
//! A worker that fails to launch is reported once and otherwise ignored; the
//! relay keeps serving connections either way.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

mod process;

pub use process::{OutputLine, OutputStream, WorkerProcess};

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory; inherits the relay's when `None`.
    pub current_dir: Option<PathBuf>,
}

impl WorkerSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to start worker `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal worker: {0}")]
    Signal(String),

    #[error("failed to wait for worker: {0}")]
    Wait(#[source] std::io::Error),
}

/// # Launch Or Report
///
/// Starts the worker described by `spec`. A launch failure is logged once at
/// `error` and swallowed, since the relay is useful without its worker.
pub fn launch_or_report(spec: &WorkerSpec) -> Option<WorkerProcess> {
    match WorkerProcess::launch(spec) {
        Ok(worker) => Some(worker),
        Err(e) => {
            log::error!("{}. Continuing without a worker.", e);
            None
        }
    }
}
